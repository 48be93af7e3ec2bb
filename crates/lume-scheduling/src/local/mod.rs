//! Local execution backend.
//!
//! Runs flows in process against a working directory. Registry operations
//! need a scheduler server and are rejected.

use async_trait::async_trait;
use lume_flows::FlowView;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

use crate::backend::{select_output, Backend, FlowManifest, RunData, RunOutput};
use crate::error::SchedulingError;

mod flow;

pub use flow::{LocalFlow, LocalTask, TaskContext, TaskError};

/// Run configuration for local runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRunConfig {
    /// Environment handed to the tasks
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,

    /// Directory the run works in; must exist
    pub working_dir: PathBuf,
}

impl LocalRunConfig {
    /// Create a run configuration for an existing directory
    pub fn new(working_dir: impl Into<PathBuf>) -> Result<Self, SchedulingError> {
        let config = Self {
            env: None,
            working_dir: working_dir.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Run configuration for the process working directory
    pub fn from_current_dir() -> Result<Self, SchedulingError> {
        Self::new(std::env::current_dir()?)
    }

    /// Set the run environment
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Check that the working directory exists
    pub fn validate(&self) -> Result<(), SchedulingError> {
        if self.working_dir.is_dir() {
            Ok(())
        } else {
            Err(SchedulingError::WorkingDirNotFound(self.working_dir.clone()))
        }
    }
}

/// Backend executing flows in the current process
#[derive(Debug, Clone, Default)]
pub struct LocalBackend {
    run_config: Option<LocalRunConfig>,
}

impl LocalBackend {
    /// Create a backend that runs in the process working directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend with a default run configuration
    pub fn with_run_config(run_config: LocalRunConfig) -> Self {
        Self {
            run_config: Some(run_config),
        }
    }

    fn resolve_run_config(
        &self,
        run_config: Option<LocalRunConfig>,
    ) -> Result<LocalRunConfig, SchedulingError> {
        let config = match run_config.or_else(|| self.run_config.clone()) {
            Some(config) => config,
            None => LocalRunConfig::from_current_dir()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Task bodies are synchronous and run on the blocking thread pool
    async fn execute(
        &self,
        data: RunData,
        run_config: Option<LocalRunConfig>,
        flow: &LocalFlow,
    ) -> Result<HashMap<String, serde_json::Value>, SchedulingError> {
        let config = self.resolve_run_config(run_config)?;
        let parameters = flow.resolve_parameters(data)?;
        let env = config.env.unwrap_or_default();

        info!(
            flow = %flow.name(),
            working_dir = %config.working_dir.display(),
            "Running flow locally"
        );

        let flow = flow.clone();
        let flow_name = flow.name().to_string();
        tokio::task::spawn_blocking(move || flow.execute(&parameters, &env, &config.working_dir))
            .await
            .map_err(|e| SchedulingError::FlowRunFailed {
                flow_run: flow_name,
                reason: e.to_string(),
            })?
    }
}

#[async_trait]
impl Backend for LocalBackend {
    type Flow = LocalFlow;
    type RunConfig = LocalRunConfig;

    #[instrument(skip(self, data, run_config, flow), fields(flow = %flow.name()))]
    async fn run(
        &self,
        data: RunData,
        run_config: Option<LocalRunConfig>,
        flow: &LocalFlow,
    ) -> Result<(), SchedulingError> {
        self.execute(data, run_config, flow).await.map(|_| ())
    }

    #[instrument(skip(self, data, run_config, flow), fields(flow = %flow.name()))]
    async fn run_and_return(
        &self,
        data: RunData,
        run_config: Option<LocalRunConfig>,
        task_slug: Option<&str>,
        flow: &LocalFlow,
    ) -> Result<RunOutput, SchedulingError> {
        if let Some(slug) = task_slug {
            if !flow.slugs().any(|known| known == slug) {
                return Err(SchedulingError::TaskNotInFlow(slug.to_string()));
            }
        }

        let results = self.execute(data, run_config, flow).await?;
        select_output(flow.slugs(), results, task_slug)
    }

    async fn create_project(
        &self,
        project_name: &str,
        _description: Option<&str>,
    ) -> Result<String, SchedulingError> {
        warn!(project = %project_name, "create_project called on local backend");
        Err(SchedulingError::LocalBackendError("create_project".to_string()))
    }

    async fn register_flow(
        &self,
        manifest: &FlowManifest,
        _project_name: &str,
    ) -> Result<String, SchedulingError> {
        warn!(flow = %manifest.name, "register_flow called on local backend");
        Err(SchedulingError::LocalBackendError("register_flow".to_string()))
    }

    async fn load_flow(
        &self,
        flow_name: &str,
        _project_name: &str,
    ) -> Result<FlowView, SchedulingError> {
        warn!(flow = %flow_name, "load_flow called on local backend");
        Err(SchedulingError::LocalBackendError("load_flow".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_requires_directory() {
        let err = LocalRunConfig::new("/definitely/not/a/dir").unwrap_err();
        assert_eq!(err.error_code(), "ERR_SCHEDULING_WORKING_DIR_NOT_FOUND");
    }

    #[test]
    fn test_run_config_deserialize_then_validate() {
        let config: LocalRunConfig =
            serde_json::from_str(r#"{"working_dir": "/definitely/not/a/dir"}"#).unwrap();
        assert!(config.env.is_none());
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_registry_operations_rejected() {
        let backend = LocalBackend::new();
        let manifest = LocalFlow::new("f").manifest();

        let errors = vec![
            backend.create_project("p", None).await.unwrap_err(),
            backend.register_flow(&manifest, "p").await.unwrap_err(),
            backend.load_flow("f", "p").await.unwrap_err(),
        ];

        for err in errors {
            assert_eq!(err.error_code(), "ERR_SCHEDULING_LOCAL_BACKEND");
        }
    }
}
