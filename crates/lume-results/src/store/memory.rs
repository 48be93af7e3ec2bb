//! In-memory implementation of ResultsStore
//!
//! Intended for tests and local runs. All data is lost when the last clone
//! is dropped.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{
    default_unique_fields, into_object, matches, unique_key, with_id, Query, ResultsStore,
    UniqueFields,
};
use crate::error::ResultsError;

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<(String, Map<String, Value>)>,
    unique_keys: HashMap<String, String>,
}

/// In-memory implementation of ResultsStore
#[derive(Debug, Clone)]
pub struct InMemoryResultsStore {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
    unique_fields: Arc<UniqueFields>,
}

impl Default for InMemoryResultsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryResultsStore {
    /// Create a store with the built-in result collections
    pub fn new() -> Self {
        Self::with_unique_fields(default_unique_fields())
    }

    /// Create a store with custom unique fields per collection
    pub fn with_unique_fields(unique_fields: UniqueFields) -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            unique_fields: Arc::new(unique_fields),
        }
    }

    /// Number of documents in a collection
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, |c| c.documents.len())
    }
}

#[async_trait]
impl ResultsStore for InMemoryResultsStore {
    async fn insert_one(&self, collection: &str, document: Value) -> Result<String, ResultsError> {
        let document = into_object(document)?;
        let key = unique_key(&document, self.unique_fields.get(collection));

        let mut collections = self.collections.write().await;
        let entry = collections.entry(collection.to_string()).or_default();

        if let Some(key) = &key {
            if entry.unique_keys.contains_key(key) {
                return Err(ResultsError::DuplicateKey {
                    collection: collection.to_string(),
                    key: key.clone(),
                });
            }
        }

        let id = Uuid::new_v4().to_string();
        if let Some(key) = key {
            entry.unique_keys.insert(key, id.clone());
        }
        entry.documents.push((id.clone(), document));

        debug!(collection = %collection, id = %id, "Inserted document");
        Ok(id)
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Value>, ResultsError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|c| {
                c.documents
                    .iter()
                    .filter(|(_, document)| matches(document, query))
                    .map(|(id, document)| with_id(id, document.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Value>, ResultsError> {
        self.find(collection, &Query::new()).await
    }

    async fn collections(&self) -> Result<Vec<String>, ResultsError> {
        let collections = self.collections.read().await;
        let names: BTreeSet<String> = self
            .unique_fields
            .keys()
            .chain(collections.keys())
            .cloned()
            .collect();
        Ok(names.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_duplicate_unique_fields_rejected() {
        let store = InMemoryResultsStore::new();
        let doc = json!({"flow_id": "f", "inputs": {"a": 1}, "outputs": {"b": 2}, "date_modified": "x"});

        store.insert_one("generic", doc.clone()).await.unwrap();

        let mut changed_date = doc.clone();
        changed_date["date_modified"] = json!("y");
        let err = store.insert_one("generic", changed_date).await.unwrap_err();
        assert_eq!(err.error_code(), "ERR_RESULTS_DUPLICATE_KEY");
        assert_eq!(store.count("generic").await, 1);
    }

    #[tokio::test]
    async fn test_collection_without_unique_fields_accepts_repeats() {
        let store = InMemoryResultsStore::new();
        store.insert_one("scratch", json!({"a": 1})).await.unwrap();
        store.insert_one("scratch", json!({"a": 1})).await.unwrap();
        assert_eq!(store.find_all("scratch").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_find_returns_ids() {
        let store = InMemoryResultsStore::new();
        let id = store.insert_one("scratch", json!({"a": 1})).await.unwrap();

        let found = store
            .find("scratch", &Query::from([("a".to_string(), json!(1))]))
            .await
            .unwrap();
        assert_eq!(found, vec![json!({"_id": id, "a": 1})]);
        assert!(store.find("absent", &Query::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_collections_include_builtin() {
        let store = InMemoryResultsStore::new();
        store.insert_one("scratch", json!({})).await.unwrap();
        assert_eq!(
            store.collections().await.unwrap(),
            vec!["generic".to_string(), "impact".to_string(), "scratch".to_string()]
        );
    }
}
