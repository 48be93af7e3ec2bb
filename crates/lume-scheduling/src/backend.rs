//! Backend abstraction shared by the local and server executors.

use async_trait::async_trait;
use lume_flows::{FlowView, Parameter, TaskView};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::SchedulingError;

/// Parameter values supplied to a run, keyed by parameter name
pub type RunData = HashMap<String, Value>;

/// What a finished run hands back
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutput {
    /// Result of the single task that was asked for
    Task(Value),

    /// Results of every task, keyed by task slug
    Flow(HashMap<String, Value>),
}

impl RunOutput {
    /// Result of the selected task, if a single task was selected
    pub fn as_task(&self) -> Option<&Value> {
        match self {
            RunOutput::Task(value) => Some(value),
            RunOutput::Flow(_) => None,
        }
    }

    /// Result of one task slug, whichever shape the output has
    pub fn get(&self, slug: &str) -> Option<&Value> {
        match self {
            RunOutput::Task(_) => None,
            RunOutput::Flow(results) => results.get(slug),
        }
    }

    /// Collapse into a single JSON value
    pub fn into_value(self) -> Value {
        match self {
            RunOutput::Task(value) => value,
            RunOutput::Flow(results) => Value::Object(results.into_iter().collect()),
        }
    }
}

/// Description of a flow handed to the scheduler at registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowManifest {
    /// Flow name
    pub name: String,

    /// Declared parameters
    #[serde(default)]
    pub parameters: Vec<Parameter>,

    /// Tasks with their slugs
    #[serde(default)]
    pub tasks: Vec<TaskView>,
}

/// Executes flows and talks to the flow registry of a scheduler.
///
/// `Flow` is whatever the backend runs: an in-process flow definition for the
/// local backend, a registered flow id for the server backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Runnable flow handle
    type Flow: ?Sized + Sync;

    /// Backend-specific run configuration
    type RunConfig: Send + Sync;

    /// Start a run without waiting for results
    async fn run(
        &self,
        data: RunData,
        run_config: Option<Self::RunConfig>,
        flow: &Self::Flow,
    ) -> Result<(), SchedulingError>;

    /// Run to completion and return the result of `task_slug`, or of every task
    /// when no slug is given
    async fn run_and_return(
        &self,
        data: RunData,
        run_config: Option<Self::RunConfig>,
        task_slug: Option<&str>,
        flow: &Self::Flow,
    ) -> Result<RunOutput, SchedulingError>;

    /// Create a project and return its id
    async fn create_project(
        &self,
        project_name: &str,
        description: Option<&str>,
    ) -> Result<String, SchedulingError>;

    /// Register a flow under a project and return its flow id
    async fn register_flow(
        &self,
        manifest: &FlowManifest,
        project_name: &str,
    ) -> Result<String, SchedulingError>;

    /// Load the latest registered version of a flow
    async fn load_flow(
        &self,
        flow_name: &str,
        project_name: &str,
    ) -> Result<FlowView, SchedulingError>;
}

/// Pick the output of a finished run.
///
/// `known_slugs` are the task slugs of the flow. A slug that is known but has
/// no recorded result yields `EmptyResult`.
pub(crate) fn select_output<'a>(
    mut known_slugs: impl Iterator<Item = &'a str>,
    results: HashMap<String, Value>,
    task_slug: Option<&str>,
) -> Result<RunOutput, SchedulingError> {
    if results.is_empty() {
        return Err(SchedulingError::EmptyResult);
    }

    match task_slug {
        None => Ok(RunOutput::Flow(results)),
        Some(slug) => {
            if !known_slugs.any(|known| known == slug) {
                return Err(SchedulingError::TaskNotInFlow(slug.to_string()));
            }
            let mut results = results;
            results
                .remove(slug)
                .map(RunOutput::Task)
                .ok_or(SchedulingError::EmptyResult)
        }
    }
}
