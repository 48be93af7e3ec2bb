use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::error::ResultsError;
use crate::models::COLLECTION_FIELD;
use crate::store::{InMemoryResultsStore, Query, ResultsStore};

/// Front door for reading and writing result documents
#[derive(Clone)]
pub struct ResultsService {
    store: Arc<dyn ResultsStore>,
}

impl ResultsService {
    /// Create a service over a store
    pub fn new(store: Arc<dyn ResultsStore>) -> Self {
        Self { store }
    }

    /// Service backed by a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryResultsStore::new()))
    }

    /// Insert a document into the collection named by its `collection` field
    #[instrument(skip(self, document))]
    pub async fn insert_one(&self, document: Value) -> Result<String, ResultsError> {
        let collection = document
            .get(COLLECTION_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ResultsError::InvalidDocument(format!("missing string field {}", COLLECTION_FIELD))
            })?
            .to_string();

        let id = self.store.insert_one(&collection, document).await?;
        info!(collection = %collection, id = %id, "Stored result");
        Ok(id)
    }

    /// Documents of a collection matching the query
    pub async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Value>, ResultsError> {
        self.store.find(collection, query).await
    }

    /// Every document of a collection
    pub async fn find_all(&self, collection: &str) -> Result<Vec<Value>, ResultsError> {
        self.store.find_all(collection).await
    }

    /// Known collection names
    pub async fn collections(&self) -> Result<Vec<String>, ResultsError> {
        self.store.collections().await
    }
}

impl fmt::Debug for ResultsService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultsService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_requires_collection() {
        let service = ResultsService::in_memory();
        let err = service.insert_one(json!({"flow_id": "f"})).await.unwrap_err();
        assert_eq!(err.error_code(), "ERR_RESULTS_INVALID_DOCUMENT");
    }

    #[tokio::test]
    async fn test_insert_routes_by_collection() {
        let service = ResultsService::in_memory();
        service
            .insert_one(json!({"collection": "generic", "flow_id": "f", "inputs": {}, "outputs": {}}))
            .await
            .unwrap();

        assert_eq!(service.find_all("generic").await.unwrap().len(), 1);
        assert!(service.find_all("impact").await.unwrap().is_empty());
    }
}
