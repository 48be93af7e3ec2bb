use lume_flows::RegistryError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while running flows
#[derive(Error, Debug)]
pub enum SchedulingError {
    /// The run finished without producing a result
    #[error("Flow run produced no result")]
    EmptyResult,

    /// The requested task slug is not part of the flow
    #[error("Task {0} not in flow")]
    TaskNotInFlow(String),

    /// A server-only operation was called on the local backend
    #[error("Operation {0} requires a scheduler server and is not supported by the local backend")]
    LocalBackendError(String),

    /// The configured working directory does not exist
    #[error("No directory found at {}", .0.display())]
    WorkingDirNotFound(PathBuf),

    /// A required parameter was not supplied and has no default
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    /// A supplied parameter is not declared by the flow
    #[error("Flow {flow} received an unexpected parameter: {parameter}")]
    UnexpectedParameter {
        /// Flow name
        flow: String,
        /// Undeclared parameter
        parameter: String,
    },

    /// The run ended in a failed state
    #[error("Flow run {flow_run} failed: {reason}")]
    FlowRunFailed {
        /// Flow run identifier (flow name for local runs)
        flow_run: String,
        /// Failure reason reported by the run
        reason: String,
    },

    /// The run did not reach a finished state in time
    #[error("Flow run {0} did not finish within {1:?}")]
    RunTimeout(String, Duration),

    /// Transport-level HTTP failures
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Errors reported by the scheduler server
    #[error("Scheduler server error: {0}")]
    Server(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Flow or project lookups that failed
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Input/output errors
    #[error("Input/output error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchedulingError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            SchedulingError::EmptyResult => "ERR_SCHEDULING_EMPTY_RESULT",
            SchedulingError::TaskNotInFlow(_) => "ERR_SCHEDULING_TASK_NOT_IN_FLOW",
            SchedulingError::LocalBackendError(_) => "ERR_SCHEDULING_LOCAL_BACKEND",
            SchedulingError::WorkingDirNotFound(_) => "ERR_SCHEDULING_WORKING_DIR_NOT_FOUND",
            SchedulingError::MissingParameter(_) => "ERR_SCHEDULING_MISSING_PARAMETER",
            SchedulingError::UnexpectedParameter { .. } => "ERR_SCHEDULING_UNEXPECTED_PARAMETER",
            SchedulingError::FlowRunFailed { .. } => "ERR_SCHEDULING_FLOW_RUN_FAILED",
            SchedulingError::RunTimeout(..) => "ERR_SCHEDULING_RUN_TIMEOUT",
            SchedulingError::Http(_) => "ERR_SCHEDULING_HTTP",
            SchedulingError::Server(_) => "ERR_SCHEDULING_SERVER",
            SchedulingError::Serialization(_) => "ERR_SCHEDULING_SERIALIZATION",
            SchedulingError::Registry(_) => "ERR_SCHEDULING_REGISTRY",
            SchedulingError::Io(_) => "ERR_SCHEDULING_IO",
        }
    }
}

impl From<SchedulingError> for RegistryError {
    fn from(err: SchedulingError) -> Self {
        match err {
            SchedulingError::Registry(inner) => inner,
            other => RegistryError::Backend(other.to_string()),
        }
    }
}
