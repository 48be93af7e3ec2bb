//! Server execution backend.
//!
//! Flows are registered with and run by a remote scheduler reached over its
//! GraphQL API. `run_and_return` polls the run until it finishes.

use async_trait::async_trait;
use lume_flows::FlowView;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument};

use crate::backend::{select_output, Backend, FlowManifest, RunData, RunOutput};
use crate::error::SchedulingError;

mod client;

pub use client::{FlowRunState, FlowRunStatus, SchedulerClient, SchedulerClientConfig, TaskRunResult};

/// Run configuration forwarded to the scheduler's agents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerRunConfig {
    /// Environment for the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,

    /// Agent labels the run is restricted to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    /// Container image to run in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Polling behavior of the server backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerBackendConfig {
    /// Delay between state checks
    pub poll_interval: Duration,
    /// Upper bound on waiting for a run to finish
    pub run_timeout: Duration,
}

impl Default for ServerBackendConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            run_timeout: Duration::from_secs(3600),
        }
    }
}

/// Backend delegating execution to a scheduler server
#[derive(Debug, Clone)]
pub struct ServerBackend {
    client: SchedulerClient,
    config: ServerBackendConfig,
}

impl ServerBackend {
    /// Create a backend on top of a scheduler client
    pub fn new(client: SchedulerClient, config: ServerBackendConfig) -> Self {
        Self { client, config }
    }

    /// Scheduler client used by this backend
    pub fn client(&self) -> &SchedulerClient {
        &self.client
    }

    async fn start(
        &self,
        data: &RunData,
        run_config: Option<ServerRunConfig>,
        flow_id: &str,
    ) -> Result<String, SchedulingError> {
        let run_config = run_config.map(serde_json::to_value).transpose()?;
        let flow_run_id = self.client.create_flow_run(flow_id, data, run_config).await?;
        info!(flow_id = %flow_id, flow_run_id = %flow_run_id, "Flow run created");
        Ok(flow_run_id)
    }

    /// Poll a flow run until it finishes, fails or the run timeout elapses
    pub async fn wait_for_flow_run(&self, flow_run_id: &str) -> Result<FlowRunStatus, SchedulingError> {
        let deadline = Instant::now() + self.config.run_timeout;

        loop {
            let status = self.client.flow_run(flow_run_id).await?;
            debug!(flow_run_id = %flow_run_id, state = %status.state, "Polled flow run");

            if status.state.is_finished() {
                if status.state.is_successful() {
                    return Ok(status);
                }
                return Err(SchedulingError::FlowRunFailed {
                    flow_run: flow_run_id.to_string(),
                    reason: status.message.unwrap_or_else(|| status.state.to_string()),
                });
            }

            if Instant::now() >= deadline {
                return Err(SchedulingError::RunTimeout(
                    flow_run_id.to_string(),
                    self.config.run_timeout,
                ));
            }
            sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait]
impl Backend for ServerBackend {
    /// Registered flow id
    type Flow = str;
    type RunConfig = ServerRunConfig;

    #[instrument(skip(self, data, run_config))]
    async fn run(
        &self,
        data: RunData,
        run_config: Option<ServerRunConfig>,
        flow: &str,
    ) -> Result<(), SchedulingError> {
        self.start(&data, run_config, flow).await.map(|_| ())
    }

    #[instrument(skip(self, data, run_config))]
    async fn run_and_return(
        &self,
        data: RunData,
        run_config: Option<ServerRunConfig>,
        task_slug: Option<&str>,
        flow: &str,
    ) -> Result<RunOutput, SchedulingError> {
        let flow_run_id = self.start(&data, run_config, flow).await?;
        let status = self.wait_for_flow_run(&flow_run_id).await?;

        select_output(
            status.task_runs.iter().map(|run| run.slug.as_str()),
            status.results(),
            task_slug,
        )
    }

    async fn create_project(
        &self,
        project_name: &str,
        description: Option<&str>,
    ) -> Result<String, SchedulingError> {
        self.client.create_project(project_name, description).await
    }

    async fn register_flow(
        &self,
        manifest: &FlowManifest,
        project_name: &str,
    ) -> Result<String, SchedulingError> {
        self.client.register_flow(manifest, project_name).await
    }

    async fn load_flow(
        &self,
        flow_name: &str,
        project_name: &str,
    ) -> Result<FlowView, SchedulingError> {
        self.client.load_flow(flow_name, project_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_serialization_skips_empty() {
        let value = serde_json::to_value(ServerRunConfig::default()).unwrap();
        assert_eq!(value, serde_json::json!({}));

        let config = ServerRunConfig {
            labels: vec!["gpu".to_string()],
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(config).unwrap()["labels"][0], "gpu");
    }
}
