//! Flow-of-flows schema types
//!
//! Descriptors are what callers write; `FlowView` is what the registry returns
//! for a registered flow; `Flow` joins the two once per composition.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A declared flow parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name
    pub name: String,

    /// Default value used when the run does not supply one
    #[serde(default)]
    pub default: Option<serde_json::Value>,

    /// Whether a value must be supplied when no default exists
    #[serde(default)]
    pub required: bool,
}

impl Parameter {
    /// Create an optional parameter without a default
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            required: false,
        }
    }

    /// Create a required parameter
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            required: true,
            ..Self::new(name)
        }
    }

    /// Set the default value
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Copy of this parameter under another name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

/// A parameter whose value comes from a task result of a parent flow
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappedParameter {
    /// Parameter of the owning flow
    pub name: String,

    /// Flow producing the value
    pub parent_flow_name: String,

    /// Task of the parent flow whose result becomes the value
    pub parent_task_name: String,
}

impl MappedParameter {
    /// Create a new mapped parameter
    pub fn new(
        name: impl Into<String>,
        parent_flow_name: impl Into<String>,
        parent_task_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            parent_flow_name: parent_flow_name.into(),
            parent_task_name: parent_task_name.into(),
        }
    }
}

/// Raw entry of a composition: which registered flow to include and how to feed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDescriptor {
    /// Registered flow name
    pub name: String,

    /// Project the flow is registered under
    pub project_name: String,

    /// Parameters sourced from upstream flows
    #[serde(default)]
    pub mapped_parameters: Option<Vec<MappedParameter>>,
}

impl FlowDescriptor {
    /// Create a descriptor without mapped parameters
    pub fn new(name: impl Into<String>, project_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            project_name: project_name.into(),
            mapped_parameters: None,
        }
    }

    /// Add a mapped parameter
    pub fn map_parameter(mut self, mapped: MappedParameter) -> Self {
        self.mapped_parameters.get_or_insert_with(Vec::new).push(mapped);
        self
    }
}

/// A task of a registered flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    /// Task name
    pub name: String,

    /// Stable identifier of the task within the flow
    pub slug: String,
}

impl TaskView {
    /// Create a new task view
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slug: slug.into(),
        }
    }
}

/// A flow as known to the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowView {
    /// Identifier assigned by the scheduler at registration
    pub flow_id: String,

    /// Flow name
    pub name: String,

    /// Owning project
    pub project_name: String,

    /// Declared parameters
    #[serde(default)]
    pub parameters: Vec<Parameter>,

    /// Tasks of the flow
    #[serde(default)]
    pub tasks: Vec<TaskView>,
}

/// One composing flow, resolved against the registry
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    /// Flow name
    pub name: String,

    /// Owning project
    pub project_name: String,

    /// Declared parameters keyed by name, in declaration order
    pub parameters: IndexMap<String, Parameter>,

    /// Parameters sourced from upstream flows, keyed by parameter name
    pub mapped_parameters: Option<IndexMap<String, MappedParameter>>,

    /// Task name to task slug
    pub task_slugs: HashMap<String, String>,

    /// Scheduler identifier of the registered flow
    pub flow_id: String,
}

impl Flow {
    /// Join a registry view with the mapped parameters of its descriptor
    pub fn from_view(view: FlowView, mapped_parameters: Option<Vec<MappedParameter>>) -> Self {
        let parameters = view
            .parameters
            .into_iter()
            .map(|parameter| (parameter.name.clone(), parameter))
            .collect();

        let mapped_parameters = mapped_parameters.map(|mapped| {
            mapped
                .into_iter()
                .map(|parameter| (parameter.name.clone(), parameter))
                .collect()
        });

        let task_slugs = view
            .tasks
            .into_iter()
            .map(|task| (task.name, task.slug))
            .collect();

        Self {
            name: view.name,
            project_name: view.project_name,
            parameters,
            mapped_parameters,
            task_slugs,
            flow_id: view.flow_id,
        }
    }

    /// Whether the parameter is fed from an upstream flow
    pub fn is_mapped(&self, parameter_name: &str) -> bool {
        self.mapped_parameters
            .as_ref()
            .map_or(false, |mapped| mapped.contains_key(parameter_name))
    }

    /// Slug of the named task
    pub fn task_slug(&self, task_name: &str) -> Option<&str> {
        self.task_slugs.get(task_name).map(String::as_str)
    }
}
