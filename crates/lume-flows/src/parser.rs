use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::schema::FlowDescriptor;

/// A flow-of-flows definition as written by users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionDocument {
    /// Name of the composed flow
    pub name: String,

    /// Project the composed flow is registered under
    pub project_name: String,

    /// Composing flows, in execution order
    #[serde(default)]
    pub flows: Vec<FlowDescriptor>,
}

/// Parse a YAML string into a CompositionDocument.
///
/// Only the document shape is checked here. References between flows are
/// validated once the flows have been resolved against a registry.
pub fn parse_composition_yaml(yaml_str: &str) -> Result<CompositionDocument, FlowError> {
    let document: CompositionDocument = serde_yaml::from_str(yaml_str)?;
    Ok(document)
}

/// Parse a JSON string into a CompositionDocument
pub fn parse_composition_json(json_str: &str) -> Result<CompositionDocument, FlowError> {
    let document: CompositionDocument = serde_json::from_str(json_str)?;
    Ok(document)
}
