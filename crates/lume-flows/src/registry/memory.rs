//! In-memory implementation of FlowRegistry
//!
//! Used for local composition and testing. All data is lost when the instance is dropped.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{FlowRegistry, RegistryError};
use crate::composer::ComposedFlow;
use crate::schema::FlowView;

/// In-memory flow registry
#[derive(Debug, Clone, Default)]
pub struct InMemoryFlowRegistry {
    flows: Arc<RwLock<HashMap<(String, String), FlowView>>>,
    composed: Arc<RwLock<HashMap<String, ComposedFlow>>>,
}

impl InMemoryFlowRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a registered flow
    pub async fn add_flow(&self, view: FlowView) {
        let key = (view.project_name.clone(), view.name.clone());
        self.flows.write().await.insert(key, view);
    }

    /// Composed flow registered under `flow_id`
    pub async fn composed_flow(&self, flow_id: &str) -> Option<ComposedFlow> {
        self.composed.read().await.get(flow_id).cloned()
    }

    /// Number of composed flows registered so far
    pub async fn composed_count(&self) -> usize {
        self.composed.read().await.len()
    }
}

#[async_trait]
impl FlowRegistry for InMemoryFlowRegistry {
    async fn load_flow(&self, name: &str, project_name: &str) -> Result<FlowView, RegistryError> {
        let flows = self.flows.read().await;

        flows
            .get(&(project_name.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::FlowNotFound {
                name: name.to_string(),
                project: project_name.to_string(),
            })
    }

    async fn register_composed_flow(
        &self,
        flow: &ComposedFlow,
        project_name: &str,
    ) -> Result<String, RegistryError> {
        let flow_id = Uuid::new_v4().to_string();
        debug!(flow = %flow.name, project = %project_name, flow_id = %flow_id, "Registering composed flow");

        let mut registered = flow.clone();
        registered.project_name = project_name.to_string();
        self.composed.write().await.insert(flow_id.clone(), registered);

        Ok(flow_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(name: &str) -> FlowView {
        FlowView {
            flow_id: format!("{}-id", name),
            name: name.to_string(),
            project_name: "proj".to_string(),
            parameters: vec![],
            tasks: vec![],
        }
    }

    #[tokio::test]
    async fn test_load_registered_flow() {
        let registry = InMemoryFlowRegistry::new();
        registry.add_flow(view("a")).await;

        let loaded = registry.load_flow("a", "proj").await.unwrap();
        assert_eq!(loaded.flow_id, "a-id");
    }

    #[tokio::test]
    async fn test_load_missing_flow() {
        let registry = InMemoryFlowRegistry::new();
        registry.add_flow(view("a")).await;

        // Same name in another project is not found
        let err = registry.load_flow("a", "other").await.unwrap_err();
        assert_eq!(
            err,
            RegistryError::FlowNotFound { name: "a".to_string(), project: "other".to_string() }
        );
    }
}
