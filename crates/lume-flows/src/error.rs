use thiserror::Error;

use crate::registry::RegistryError;

/// All errors that can occur while building or composing a flow of flows
#[derive(Error, Debug)]
pub enum FlowError {
    /// A mapped parameter names a parameter the owning flow does not declare
    #[error("Parameter {parameter} not in flow {flow}.")]
    ParameterNotInFlow {
        /// Name of the missing parameter
        parameter: String,
        /// Flow that was expected to declare it
        flow: String,
    },

    /// A mapped parameter names a parent flow that is not being composed
    #[error("Parent flow {flow} not in flows: {}.", .flows.join(", "))]
    ParentFlowNotInFlows {
        /// Name of the missing parent flow
        flow: String,
        /// Names of the composing flows, in composition order
        flows: Vec<String>,
    },

    /// A mapped parameter names a task the parent flow does not contain
    #[error("Task {task} not in flow {flow}.")]
    TaskNotInFlow {
        /// Parent flow name
        flow: String,
        /// Missing task name
        task: String,
    },

    /// A mapped parameter points at a flow that does not run before its consumer
    #[error("Parent flow {parent} must precede flow {flow} in the composition")]
    ParentFlowNotUpstream {
        /// Flow owning the mapped parameter
        flow: String,
        /// Parent flow referenced by the mapped parameter
        parent: String,
    },

    /// The same flow name was listed twice
    #[error("Duplicate flow in composition: {0}")]
    DuplicateFlow(String),

    /// The composition graph failed its structural check
    #[error("Invalid composition graph: {0}")]
    InvalidGraph(String),

    /// Errors raised by the flow registry
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Errors that occur during YAML parsing
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Errors that occur during JSON processing
    #[error("JSON processing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            FlowError::ParameterNotInFlow { .. } => "ERR_FLOWS_PARAMETER_NOT_IN_FLOW",
            FlowError::ParentFlowNotInFlows { .. } => "ERR_FLOWS_PARENT_FLOW_NOT_IN_FLOWS",
            FlowError::TaskNotInFlow { .. } => "ERR_FLOWS_TASK_NOT_IN_FLOW",
            FlowError::ParentFlowNotUpstream { .. } => "ERR_FLOWS_PARENT_FLOW_NOT_UPSTREAM",
            FlowError::DuplicateFlow(_) => "ERR_FLOWS_DUPLICATE_FLOW",
            FlowError::InvalidGraph(_) => "ERR_FLOWS_INVALID_GRAPH",
            FlowError::Registry(_) => "ERR_FLOWS_REGISTRY",
            FlowError::Yaml(_) => "ERR_FLOWS_YAML_PARSE",
            FlowError::Json(_) => "ERR_FLOWS_JSON_PARSE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            (
                FlowError::ParameterNotInFlow {
                    parameter: "x".to_string(),
                    flow: "flow1".to_string(),
                },
                "Parameter x not in flow flow1.",
            ),
            (
                FlowError::ParentFlowNotInFlows {
                    flow: "missing".to_string(),
                    flows: vec!["a".to_string(), "b".to_string()],
                },
                "Parent flow missing not in flows: a, b.",
            ),
            (
                FlowError::TaskNotInFlow {
                    flow: "a".to_string(),
                    task: "t".to_string(),
                },
                "Task t not in flow a.",
            ),
            (
                FlowError::DuplicateFlow("a".to_string()),
                "Duplicate flow in composition: a",
            ),
        ];

        for (error, expected_msg) in errors {
            assert_eq!(error.to_string(), expected_msg);
        }
    }

    #[test]
    fn test_error_codes() {
        let err = FlowError::InvalidGraph("cycle".to_string());
        assert_eq!(err.error_code(), "ERR_FLOWS_INVALID_GRAPH");

        let err = FlowError::Registry(RegistryError::Backend("down".to_string()));
        assert_eq!(err.error_code(), "ERR_FLOWS_REGISTRY");
    }
}
