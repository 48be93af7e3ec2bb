//! SQLite implementation of ResultsStore
//!
//! Documents are kept as JSON in a single `results` table. Uniqueness is
//! enforced by the database through a unique index on
//! `(collection, unique_key)`; documents without unique fields store a NULL
//! key and never conflict.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{
    default_unique_fields, into_object, matches, unique_key, with_id, Query, ResultsStore,
    UniqueFields,
};
use crate::error::ResultsError;

/// Schema migrations, applied in order and recorded in `lume_migrations`
pub fn migrations() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "20240601000000_results",
            r#"
            CREATE TABLE IF NOT EXISTS results (
                id TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                unique_key TEXT,
                document TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_results_collection_unique_key
                ON results(collection, unique_key);
            "#,
        ),
        (
            "20240602000000_results_collection_index",
            r#"
            CREATE INDEX IF NOT EXISTS idx_results_collection_created_at
                ON results(collection, created_at);
            "#,
        ),
    ]
}

/// SQLite implementation of ResultsStore
#[derive(Debug, Clone)]
pub struct SqlResultsStore {
    pool: SqlitePool,
    unique_fields: Arc<UniqueFields>,
}

impl SqlResultsStore {
    /// Connect to a database and bring its schema up to date.
    ///
    /// In-memory databases live in a single connection, so the pool is
    /// capped at one connection that is never recycled.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, ResultsError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| ResultsError::Configuration(format!("Invalid database URL {}: {}", url, e)))?
            .create_if_missing(true);

        let pool_options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .acquire_timeout(Duration::from_secs(5))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| ResultsError::Database(format!("Failed to connect to database: {}", e)))?;

        let store = Self::from_pool(pool);
        store.run_migrations().await?;
        Ok(store)
    }

    /// Wrap an existing pool without running migrations
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            unique_fields: Arc::new(default_unique_fields()),
        }
    }

    /// Replace the unique fields per collection
    pub fn with_unique_fields(mut self, unique_fields: UniqueFields) -> Self {
        self.unique_fields = Arc::new(unique_fields);
        self
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply migrations that have not run yet
    pub async fn run_migrations(&self) -> Result<(), ResultsError> {
        info!("Running results database migrations");

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS lume_migrations (version TEXT PRIMARY KEY, applied_at TEXT NOT NULL)",
        )
        .execute(&self.pool)
        .await?;

        for (version, sql) in migrations() {
            let applied = sqlx::query("SELECT version FROM lume_migrations WHERE version = ?")
                .bind(version)
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            if applied {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(sql).execute(&mut *tx).await.map_err(|e| {
                ResultsError::Database(format!("Failed to apply migration {}: {}", version, e))
            })?;
            sqlx::query("INSERT INTO lume_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            debug!("Applied migration {}", version);
        }

        info!("Migrations completed successfully");
        Ok(())
    }

    async fn load(&self, collection: &str) -> Result<Vec<(String, Map<String, Value>)>, ResultsError> {
        let rows = sqlx::query(
            "SELECT id, document FROM results WHERE collection = ? ORDER BY created_at, rowid",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<_, ResultsError> {
                let id: String = row.try_get("id")?;
                let Json(document): Json<Value> = row.try_get("document")?;
                Ok((id, into_object(document)?))
            })
            .collect()
    }
}

#[async_trait]
impl ResultsStore for SqlResultsStore {
    #[instrument(skip(self, document))]
    async fn insert_one(&self, collection: &str, document: Value) -> Result<String, ResultsError> {
        let document = into_object(document)?;
        let key = unique_key(&document, self.unique_fields.get(collection));
        let id = Uuid::new_v4().to_string();

        let result = sqlx::query(
            "INSERT INTO results (id, collection, unique_key, document, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(collection)
        .bind(&key)
        .bind(Json(Value::Object(document)))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(id = %id, "Inserted document");
                Ok(id)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(ResultsError::DuplicateKey {
                    collection: collection.to_string(),
                    key: key.unwrap_or_default(),
                })
            }
            Err(e) => Err(ResultsError::Database(format!("Failed to insert document: {}", e))),
        }
    }

    #[instrument(skip(self, query))]
    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Value>, ResultsError> {
        Ok(self
            .load(collection)
            .await?
            .into_iter()
            .filter(|(_, document)| matches(document, query))
            .map(|(id, document)| with_id(&id, document))
            .collect())
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Value>, ResultsError> {
        Ok(self
            .load(collection)
            .await?
            .into_iter()
            .map(|(id, document)| with_id(&id, document))
            .collect())
    }

    async fn collections(&self) -> Result<Vec<String>, ResultsError> {
        let rows = sqlx::query("SELECT DISTINCT collection FROM results")
            .fetch_all(&self.pool)
            .await?;

        let mut names: BTreeSet<String> = self.unique_fields.keys().cloned().collect();
        for row in rows {
            names.insert(row.try_get("collection")?);
        }
        Ok(names.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_store() -> SqlResultsStore {
        SqlResultsStore::connect("sqlite::memory:", 1).await.unwrap()
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let store = memory_store().await;
        store.run_migrations().await.unwrap();

        let applied: i64 = sqlx::query("SELECT COUNT(*) AS n FROM lume_migrations")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("n");
        assert_eq!(applied, migrations().len() as i64);
    }

    #[tokio::test]
    async fn test_unique_violation_maps_to_duplicate_key() {
        let store = memory_store().await;
        let doc = json!({"flow_id": "f", "inputs": {}, "outputs": {"x": 1}});

        store.insert_one("generic", doc.clone()).await.unwrap();
        let err = store.insert_one("generic", doc.clone()).await.unwrap_err();
        assert!(matches!(err, ResultsError::DuplicateKey { ref collection, .. } if collection == "generic"));

        // same document in another collection does not conflict
        store.insert_one("impact", doc).await.unwrap();
    }

    #[tokio::test]
    async fn test_null_unique_keys_never_conflict() {
        let store = memory_store().await;
        store.insert_one("scratch", json!({"a": 1})).await.unwrap();
        store.insert_one("scratch", json!({"a": 1})).await.unwrap();
        assert_eq!(store.find_all("scratch").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_find_by_nested_field() {
        let store = memory_store().await;
        store
            .insert_one("generic", json!({"flow_id": "a", "inputs": {"input1": 2.0}, "outputs": {}}))
            .await
            .unwrap();
        store
            .insert_one("generic", json!({"flow_id": "b", "inputs": {"input1": 3.0}, "outputs": {}}))
            .await
            .unwrap();

        let found = store
            .find("generic", &Query::from([("inputs.input1".to_string(), json!(2.0))]))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["flow_id"], "a");
        assert!(found[0]["_id"].is_string());
    }

    #[tokio::test]
    async fn test_file_database_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("results.db").display());

        let store = SqlResultsStore::connect(&url, 2).await.unwrap();
        store.insert_one("scratch", json!({"a": 1})).await.unwrap();
        store.pool().close().await;

        let reopened = SqlResultsStore::connect(&url, 2).await.unwrap();
        assert_eq!(reopened.find_all("scratch").await.unwrap().len(), 1);
        assert!(reopened.collections().await.unwrap().contains(&"scratch".to_string()));
    }
}
