//! Seam between the composer and the external scheduler's flow registry.

use async_trait::async_trait;
use thiserror::Error;

use crate::composer::ComposedFlow;
use crate::schema::FlowView;

pub mod memory;

pub use memory::InMemoryFlowRegistry;

/// Errors raised by flow registries
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No flow with that name is registered in the project
    #[error("Flow {name} not found in project {project}")]
    FlowNotFound {
        /// Flow name
        name: String,
        /// Project name
        project: String,
    },

    /// The project does not exist
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Catch-all for registry backend failures
    #[error("Registry backend error: {0}")]
    Backend(String),
}

/// Registry of flows known to the scheduler
#[async_trait]
pub trait FlowRegistry: Send + Sync {
    /// Resolve the latest registered version of a flow
    async fn load_flow(&self, name: &str, project_name: &str) -> Result<FlowView, RegistryError>;

    /// Register a composed flow under a project and return its flow id
    async fn register_composed_flow(
        &self,
        flow: &ComposedFlow,
        project_name: &str,
    ) -> Result<String, RegistryError>;
}
