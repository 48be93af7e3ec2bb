//! In-process flow definitions executed by the local backend.

use lume_flows::{Parameter, TaskView};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::backend::{FlowManifest, RunData};
use crate::error::SchedulingError;

/// Failure raised by a task body
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    /// An input the task depends on is absent
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// The task ran and failed
    #[error("{0}")]
    Failed(String),
}

/// Everything a task body can read while running
#[derive(Debug)]
pub struct TaskContext<'a> {
    /// Resolved run parameters
    pub parameters: &'a RunData,

    /// Results of the tasks that already ran, keyed by slug
    pub results: &'a HashMap<String, Value>,

    /// Environment configured for the run
    pub env: &'a HashMap<String, String>,

    /// Working directory of the run
    pub working_dir: &'a Path,
}

impl<'a> TaskContext<'a> {
    /// Value of a run parameter
    pub fn parameter(&self, name: &str) -> Result<&'a Value, TaskError> {
        self.parameters
            .get(name)
            .ok_or_else(|| TaskError::MissingInput(name.to_string()))
    }

    /// Result of an upstream task
    pub fn result(&self, slug: &str) -> Result<&'a Value, TaskError> {
        self.results
            .get(slug)
            .ok_or_else(|| TaskError::MissingInput(slug.to_string()))
    }

    /// Environment variable configured for the run
    pub fn env(&self, key: &str) -> Option<&'a str> {
        self.env.get(key).map(String::as_str)
    }
}

type TaskFn = dyn Fn(&TaskContext<'_>) -> Result<Value, TaskError> + Send + Sync;

/// One step of a local flow
#[derive(Clone)]
pub struct LocalTask {
    name: String,
    slug: String,
    body: Arc<TaskFn>,
}

impl LocalTask {
    /// Task name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Task slug, unique within the flow
    pub fn slug(&self) -> &str {
        &self.slug
    }
}

impl fmt::Debug for LocalTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTask")
            .field("name", &self.name)
            .field("slug", &self.slug)
            .finish()
    }
}

/// A flow defined in process: parameters plus tasks run in order
#[derive(Debug, Clone)]
pub struct LocalFlow {
    name: String,
    parameters: Vec<Parameter>,
    tasks: Vec<LocalTask>,
}

impl LocalFlow {
    /// Create an empty flow
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Declare a parameter
    pub fn parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Append a task. Slugs are `{name}-{n}` where `n` counts tasks sharing the name.
    pub fn task<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&TaskContext<'_>) -> Result<Value, TaskError> + Send + Sync + 'static,
    {
        let name = name.into();
        let count = self.tasks.iter().filter(|task| task.name == name).count();
        let slug = format!("{}-{}", name, count + 1);
        self.tasks.push(LocalTask {
            name,
            slug,
            body: Arc::new(body),
        });
        self
    }

    /// Flow name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameters
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Tasks in execution order
    pub fn tasks(&self) -> &[LocalTask] {
        &self.tasks
    }

    /// Task slugs in execution order
    pub fn slugs(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(LocalTask::slug)
    }

    /// Registration manifest of this flow
    pub fn manifest(&self) -> FlowManifest {
        FlowManifest {
            name: self.name.clone(),
            parameters: self.parameters.clone(),
            tasks: self
                .tasks
                .iter()
                .map(|task| TaskView::new(task.name.clone(), task.slug.clone()))
                .collect(),
        }
    }

    /// Apply defaults and check supplied values against the declared parameters
    pub(crate) fn resolve_parameters(&self, mut data: RunData) -> Result<RunData, SchedulingError> {
        if let Some(unexpected) = data
            .keys()
            .find(|key| !self.parameters.iter().any(|p| &p.name == *key))
        {
            return Err(SchedulingError::UnexpectedParameter {
                flow: self.name.clone(),
                parameter: unexpected.clone(),
            });
        }

        for parameter in &self.parameters {
            if data.contains_key(&parameter.name) {
                continue;
            }
            match (&parameter.default, parameter.required) {
                (Some(default), _) => {
                    data.insert(parameter.name.clone(), default.clone());
                }
                (None, true) => {
                    return Err(SchedulingError::MissingParameter(parameter.name.clone()));
                }
                (None, false) => {
                    data.insert(parameter.name.clone(), Value::Null);
                }
            }
        }

        Ok(data)
    }

    /// Run every task in order and collect results by slug
    pub(crate) fn execute(
        &self,
        parameters: &RunData,
        env: &HashMap<String, String>,
        working_dir: &Path,
    ) -> Result<HashMap<String, Value>, SchedulingError> {
        let mut results = HashMap::with_capacity(self.tasks.len());

        for task in &self.tasks {
            let value = {
                let ctx = TaskContext {
                    parameters,
                    results: &results,
                    env,
                    working_dir,
                };
                (task.body)(&ctx)
            }
            .map_err(|e| SchedulingError::FlowRunFailed {
                flow_run: self.name.clone(),
                reason: format!("task {} failed: {}", task.slug, e),
            })?;

            debug!(flow = %self.name, task = %task.slug, "Task finished");
            results.insert(task.slug.clone(), value);
        }

        Ok(results)
    }
}
