//! # Lume Scheduling
//!
//! Execution backends for flows. The local backend runs in-process flow
//! definitions; the server backend creates and watches flow runs on a remote
//! scheduler and doubles as the flow registry used by composition.

mod backend;
mod error;

pub mod local;
pub mod server;

pub use backend::{Backend, FlowManifest, RunData, RunOutput};
pub use error::SchedulingError;
pub use local::{LocalBackend, LocalFlow, LocalRunConfig, LocalTask, TaskContext, TaskError};
pub use server::{
    FlowRunState, FlowRunStatus, SchedulerClient, SchedulerClientConfig, ServerBackend,
    ServerBackendConfig, ServerRunConfig, TaskRunResult,
};

/// Returns a version string for the crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
