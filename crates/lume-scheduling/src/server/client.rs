use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use lume_flows::{ComposedFlow, FlowRegistry, FlowView, Parameter, RegistryError, TaskView};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::backend::{FlowManifest, RunData};
use crate::error::SchedulingError;

const CREATE_PROJECT: &str = r#"
mutation($input: create_project_input!) {
  create_project(input: $input) { id }
}"#;

const PROJECT_BY_NAME: &str = r#"
query($name: String!) {
  project(where: { name: { _eq: $name } }) { id }
}"#;

const CREATE_FLOW: &str = r#"
mutation($input: create_flow_input!) {
  create_flow(input: $input) { id }
}"#;

const LATEST_FLOW: &str = r#"
query($name: String!, $project: String!) {
  flow(
    where: { name: { _eq: $name }, project: { name: { _eq: $project } }, archived: { _eq: false } }
    order_by: { version: desc }
    limit: 1
  ) { id name parameters tasks { name slug } project { name } }
}"#;

const CREATE_FLOW_RUN: &str = r#"
mutation($input: create_flow_run_input!) {
  create_flow_run(input: $input) { id }
}"#;

const FLOW_RUN_STATE: &str = r#"
query($id: uuid!) {
  flow_run_by_pk(id: $id) { id state state_message task_runs { task { slug } result } }
}"#;

/// Configuration for the scheduler API client
#[derive(Debug, Clone)]
pub struct SchedulerClientConfig {
    /// Base URL of the scheduler API
    pub api_url: String,
    /// Timeout in seconds for HTTP requests
    pub timeout_secs: u64,
    /// Bearer token sent with every request
    pub api_token: Option<String>,
}

impl Default for SchedulerClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:4200".to_string(),
            timeout_secs: 30,
            api_token: None,
        }
    }
}

/// Lifecycle state of a flow run as reported by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowRunState {
    Scheduled,
    Submitted,
    Queued,
    Pending,
    Running,
    Success,
    /// Finished without running because an upstream result made it unnecessary
    Skipped,
    /// Finished from a cached result
    Cached,
    Failed,
    TriggerFailed,
    ValidationFailed,
    ClientFailed,
    Cancelled,
    TimedOut,
    /// A state this client does not know; treated as not finished
    Other(String),
}

impl FlowRunState {
    /// Whether the run reached a terminal state
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            FlowRunState::Success
                | FlowRunState::Skipped
                | FlowRunState::Cached
                | FlowRunState::Failed
                | FlowRunState::TriggerFailed
                | FlowRunState::ValidationFailed
                | FlowRunState::ClientFailed
                | FlowRunState::Cancelled
                | FlowRunState::TimedOut
        )
    }

    /// Whether the run finished successfully
    pub fn is_successful(&self) -> bool {
        matches!(
            self,
            FlowRunState::Success | FlowRunState::Skipped | FlowRunState::Cached
        )
    }
}

impl From<&str> for FlowRunState {
    fn from(state: &str) -> Self {
        match state {
            "Scheduled" => FlowRunState::Scheduled,
            "Submitted" => FlowRunState::Submitted,
            "Queued" => FlowRunState::Queued,
            "Pending" => FlowRunState::Pending,
            "Running" => FlowRunState::Running,
            "Success" => FlowRunState::Success,
            "Skipped" => FlowRunState::Skipped,
            "Cached" => FlowRunState::Cached,
            "Failed" => FlowRunState::Failed,
            "TriggerFailed" => FlowRunState::TriggerFailed,
            "ValidationFailed" => FlowRunState::ValidationFailed,
            "ClientFailed" => FlowRunState::ClientFailed,
            "Cancelled" => FlowRunState::Cancelled,
            "TimedOut" => FlowRunState::TimedOut,
            other => FlowRunState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FlowRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowRunState::Other(state) => write!(f, "{}", state),
            known => write!(f, "{:?}", known),
        }
    }
}

/// Result recorded for one task run
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRunResult {
    /// Task slug
    pub slug: String,
    /// Result value, absent when the task produced none
    pub result: Option<Value>,
}

/// Snapshot of a flow run
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRunStatus {
    /// Flow run id
    pub id: String,
    /// Current state
    pub state: FlowRunState,
    /// Message attached to the state
    pub message: Option<String>,
    /// Task runs so far
    pub task_runs: Vec<TaskRunResult>,
}

impl FlowRunStatus {
    /// Task results keyed by slug, skipping tasks without a result
    pub fn results(&self) -> HashMap<String, Value> {
        self.task_runs
            .iter()
            .filter_map(|run| run.result.clone().map(|result| (run.slug.clone(), result)))
            .collect()
    }
}

/// GraphQL request payload
#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: Value,
}

/// GraphQL response wrapper
#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct IdRecord {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CreateProjectData {
    create_project: IdRecord,
}

#[derive(Debug, Deserialize)]
struct ProjectData {
    project: Vec<IdRecord>,
}

#[derive(Debug, Deserialize)]
struct CreateFlowData {
    create_flow: IdRecord,
}

#[derive(Debug, Deserialize)]
struct CreateFlowRunData {
    create_flow_run: IdRecord,
}

#[derive(Debug, Deserialize)]
struct NameRecord {
    name: String,
}

#[derive(Debug, Deserialize)]
struct FlowRecord {
    id: String,
    name: String,
    #[serde(default)]
    parameters: Vec<Parameter>,
    #[serde(default)]
    tasks: Vec<TaskView>,
    project: NameRecord,
}

#[derive(Debug, Deserialize)]
struct FlowData {
    flow: Vec<FlowRecord>,
}

#[derive(Debug, Deserialize)]
struct SlugRecord {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct TaskRunRecord {
    task: SlugRecord,
    #[serde(default)]
    result: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FlowRunRecord {
    id: String,
    state: String,
    #[serde(default)]
    state_message: Option<String>,
    #[serde(default)]
    task_runs: Vec<TaskRunRecord>,
}

#[derive(Debug, Deserialize)]
struct FlowRunData {
    flow_run_by_pk: Option<FlowRunRecord>,
}

/// Client for the scheduler's GraphQL API
#[derive(Debug, Clone)]
pub struct SchedulerClient {
    config: SchedulerClientConfig,
    client: Client,
}

impl SchedulerClient {
    /// Creates a new SchedulerClient with the provided configuration
    pub fn new(config: SchedulerClientConfig) -> Result<Self, SchedulingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    /// Creates a new SchedulerClient with the provided API URL and timeout
    pub fn with_url_and_timeout(
        api_url: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, SchedulingError> {
        Self::new(SchedulerClientConfig {
            api_url: api_url.into(),
            timeout_secs,
            api_token: None,
        })
    }

    /// Base URL of the scheduler API
    pub fn api_url(&self) -> &str {
        &self.config.api_url
    }

    /// Maps an HTTP error to a SchedulingError
    fn map_http_error(error: reqwest::Error) -> SchedulingError {
        if error.is_timeout() {
            SchedulingError::Server(format!("Request timeout: {}", error))
        } else if error.is_connect() {
            SchedulingError::Server(format!("Connection error: {}", error))
        } else {
            SchedulingError::Http(error)
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<T, SchedulingError> {
        let url = format!("{}/graphql", self.config.api_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&GraphQlRequest { query, variables });
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(Self::map_http_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| format!("HTTP error: {}", status));
            return Err(SchedulingError::Server(format!("{}: {}", status, error_body)));
        }

        let body: GraphQlResponse<T> = response
            .json()
            .await
            .map_err(|e| SchedulingError::Server(format!("Failed to parse response: {}", e)))?;

        if let Some(errors) = body.errors.filter(|errors| !errors.is_empty()) {
            let messages: Vec<_> = errors.into_iter().map(|e| e.message).collect();
            return Err(SchedulingError::Server(messages.join("; ")));
        }

        body.data
            .ok_or_else(|| SchedulingError::Server("Response contained no data".to_string()))
    }

    /// Create a project and return its id
    #[instrument(skip(self))]
    pub async fn create_project(
        &self,
        project_name: &str,
        description: Option<&str>,
    ) -> Result<String, SchedulingError> {
        let data: CreateProjectData = self
            .execute(
                CREATE_PROJECT,
                json!({ "input": { "name": project_name, "description": description } }),
            )
            .await?;
        debug!("Created project {} with id {}", project_name, data.create_project.id);
        Ok(data.create_project.id)
    }

    /// Look up the id of a project
    #[instrument(skip(self))]
    pub async fn project_id(&self, project_name: &str) -> Result<String, SchedulingError> {
        let data: ProjectData = self
            .execute(PROJECT_BY_NAME, json!({ "name": project_name }))
            .await?;
        data.project
            .into_iter()
            .next()
            .map(|project| project.id)
            .ok_or_else(|| RegistryError::ProjectNotFound(project_name.to_string()).into())
    }

    async fn create_flow(
        &self,
        serialized_flow: Value,
        project_name: &str,
    ) -> Result<String, SchedulingError> {
        let project_id = self.project_id(project_name).await?;
        let data: CreateFlowData = self
            .execute(
                CREATE_FLOW,
                json!({
                    "input": {
                        "project_id": project_id,
                        "serialized_flow": serialized_flow,
                        "set_schedule_active": false,
                    }
                }),
            )
            .await?;
        Ok(data.create_flow.id)
    }

    /// Register a flow under a project and return its flow id
    #[instrument(skip(self, manifest), fields(flow = %manifest.name))]
    pub async fn register_flow(
        &self,
        manifest: &FlowManifest,
        project_name: &str,
    ) -> Result<String, SchedulingError> {
        let flow_id = self
            .create_flow(serde_json::to_value(manifest)?, project_name)
            .await?;
        debug!("Registered flow {} as {}", manifest.name, flow_id);
        Ok(flow_id)
    }

    /// Load the latest unarchived version of a flow
    #[instrument(skip(self))]
    pub async fn load_flow(
        &self,
        flow_name: &str,
        project_name: &str,
    ) -> Result<FlowView, SchedulingError> {
        let data: FlowData = self
            .execute(LATEST_FLOW, json!({ "name": flow_name, "project": project_name }))
            .await?;

        let record = data.flow.into_iter().next().ok_or_else(|| {
            SchedulingError::Registry(RegistryError::FlowNotFound {
                name: flow_name.to_string(),
                project: project_name.to_string(),
            })
        })?;

        Ok(FlowView {
            flow_id: record.id,
            name: record.name,
            project_name: record.project.name,
            parameters: record.parameters,
            tasks: record.tasks,
        })
    }

    /// Create a flow run and return its id
    #[instrument(skip(self, parameters, run_config))]
    pub async fn create_flow_run(
        &self,
        flow_id: &str,
        parameters: &RunData,
        run_config: Option<Value>,
    ) -> Result<String, SchedulingError> {
        let data: CreateFlowRunData = self
            .execute(
                CREATE_FLOW_RUN,
                json!({
                    "input": {
                        "flow_id": flow_id,
                        "parameters": parameters,
                        "run_config": run_config,
                    }
                }),
            )
            .await?;
        debug!("Created flow run {}", data.create_flow_run.id);
        Ok(data.create_flow_run.id)
    }

    /// Fetch the current state of a flow run
    #[instrument(skip(self))]
    pub async fn flow_run(&self, flow_run_id: &str) -> Result<FlowRunStatus, SchedulingError> {
        let data: FlowRunData = self
            .execute(FLOW_RUN_STATE, json!({ "id": flow_run_id }))
            .await?;

        let record = data.flow_run_by_pk.ok_or_else(|| {
            SchedulingError::Server(format!("Flow run {} not found", flow_run_id))
        })?;

        Ok(FlowRunStatus {
            id: record.id,
            state: FlowRunState::from(record.state.as_str()),
            message: record.state_message,
            task_runs: record
                .task_runs
                .into_iter()
                .map(|run| TaskRunResult {
                    slug: run.task.slug,
                    result: run.result,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl FlowRegistry for SchedulerClient {
    async fn load_flow(&self, name: &str, project_name: &str) -> Result<FlowView, RegistryError> {
        SchedulerClient::load_flow(self, name, project_name)
            .await
            .map_err(RegistryError::from)
    }

    #[instrument(skip(self, flow), fields(flow = %flow.name))]
    async fn register_composed_flow(
        &self,
        flow: &ComposedFlow,
        project_name: &str,
    ) -> Result<String, RegistryError> {
        let serialized = serde_json::to_value(flow)
            .map_err(|e| RegistryError::Backend(format!("Failed to serialize flow: {}", e)))?;
        self.create_flow(serialized, project_name)
            .await
            .map_err(RegistryError::from)
    }
}
