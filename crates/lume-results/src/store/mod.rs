//! Document stores for results.
//!
//! Documents are JSON objects grouped by collection. Each collection may
//! declare unique fields; a second document with the same values for those
//! fields is rejected with `DuplicateKey`.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::error::ResultsError;
use crate::models::ResultKind;

pub mod memory;
pub mod sql;

pub use memory::InMemoryResultsStore;
pub use sql::SqlResultsStore;

/// Key under which stores return the document id
pub const ID_FIELD: &str = "_id";

/// Dotted field path to expected value, all of which must match
pub type Query = HashMap<String, Value>;

/// Unique fields per collection
pub type UniqueFields = HashMap<String, Vec<String>>;

/// Persistence of result documents
#[async_trait]
pub trait ResultsStore: Send + Sync {
    /// Insert a document and return its id
    async fn insert_one(&self, collection: &str, document: Value) -> Result<String, ResultsError>;

    /// Documents of a collection matching every entry of the query
    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Value>, ResultsError>;

    /// Every document of a collection
    async fn find_all(&self, collection: &str) -> Result<Vec<Value>, ResultsError>;

    /// Known collection names, sorted
    async fn collections(&self) -> Result<Vec<String>, ResultsError>;
}

/// Unique fields of the built-in result collections
pub fn default_unique_fields() -> UniqueFields {
    ResultKind::ALL
        .iter()
        .map(|kind| {
            (
                kind.collection().to_string(),
                kind.unique_fields().iter().map(|f| f.to_string()).collect(),
            )
        })
        .collect()
}

/// Check that a document is an object and drop any caller-supplied id
pub(crate) fn into_object(document: Value) -> Result<Map<String, Value>, ResultsError> {
    match document {
        Value::Object(mut fields) => {
            fields.remove(ID_FIELD);
            Ok(fields)
        }
        other => Err(ResultsError::InvalidDocument(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

/// Hash of the unique fields of a document, `None` when the collection has none
pub(crate) fn unique_key(
    document: &Map<String, Value>,
    fields: Option<&Vec<String>>,
) -> Option<String> {
    let fields = fields.filter(|fields| !fields.is_empty())?;

    let mut canonical = String::new();
    for field in fields {
        canonical.push_str(field);
        canonical.push('=');
        write_canonical(document.get(field).unwrap_or(&Value::Null), &mut canonical);
        canonical.push(';');
    }

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Some(hex::encode(hasher.finalize()))
}

/// JSON text with object keys sorted at every level
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(fields) => {
            let mut keys: Vec<_> = fields.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&fields[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Resolve a dotted path such as `inputs.input1`
fn lookup<'a>(document: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(fields) => fields.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Whether a document satisfies every entry of the query
pub(crate) fn matches(document: &Map<String, Value>, query: &Query) -> bool {
    query
        .iter()
        .all(|(path, expected)| lookup(document, path) == Some(expected))
}

/// Document as returned to callers, with its id
pub(crate) fn with_id(id: &str, mut document: Map<String, Value>) -> Value {
    document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    Value::Object(document)
}
