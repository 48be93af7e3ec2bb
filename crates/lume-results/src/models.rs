//! Result models persisted by flows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::ResultsError;
use crate::files::FileReference;
use crate::service::ResultsService;
use crate::store::Query;
use crate::value::ValueMap;

/// Document field naming the collection a document belongs to
pub const COLLECTION_FIELD: &str = "collection";

const UNIQUE_FIELDS: &[&str] = &["flow_id", "inputs", "outputs"];

/// Known result types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    Generic,
    Impact,
}

impl ResultKind {
    /// Every known result type
    pub const ALL: [ResultKind; 2] = [ResultKind::Generic, ResultKind::Impact];

    /// Collection documents of this type are stored in
    pub fn collection(&self) -> &'static str {
        match self {
            ResultKind::Generic => "generic",
            ResultKind::Impact => "impact",
        }
    }

    /// Rust type name of the model
    pub fn type_name(&self) -> &'static str {
        match self {
            ResultKind::Generic => "GenericResult",
            ResultKind::Impact => "ImpactResult",
        }
    }

    /// Fields that identify a result; two documents may not share all of them
    pub fn unique_fields(&self) -> &'static [&'static str] {
        UNIQUE_FIELDS
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

impl FromStr for ResultKind {
    type Err = ResultsError;

    /// Accepts a collection name (`impact`), a type name (`ImpactResult`) or a
    /// qualified type path ending in one (`lume_results::models::ImpactResult`,
    /// `results.impact:ImpactResult`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s
            .rsplit(|c| c == ':' || c == '.')
            .next()
            .unwrap_or(s)
            .trim();

        ResultKind::ALL
            .into_iter()
            .find(|kind| {
                kind.type_name() == name || kind.collection().eq_ignore_ascii_case(name)
            })
            .ok_or_else(|| ResultsError::UnknownResultType(s.to_string()))
    }
}

/// Collection name to result type, for every known result type
pub fn collections() -> IndexMap<&'static str, ResultKind> {
    ResultKind::ALL
        .into_iter()
        .map(|kind| (kind.collection(), kind))
        .collect()
}

/// A result that can be written to and read back from a results service
#[async_trait]
pub trait ResultModel: Serialize + DeserializeOwned + Send + Sync {
    /// Result type of the model
    const KIND: ResultKind;

    /// Store document for this result, tagged with its collection
    fn to_document(&self) -> Result<Value, ResultsError> {
        let mut document = serde_json::to_value(self)?;
        let fields = document.as_object_mut().ok_or_else(|| {
            ResultsError::InvalidDocument(format!("{} must serialize to an object", Self::KIND.type_name()))
        })?;
        fields.insert(
            COLLECTION_FIELD.to_string(),
            Value::String(Self::KIND.collection().to_string()),
        );
        Ok(document)
    }

    /// Rebuild a result from a store document
    fn from_document(document: Value) -> Result<Self, ResultsError> {
        if let Some(collection) = document.get(COLLECTION_FIELD).and_then(Value::as_str) {
            if collection != Self::KIND.collection() {
                return Err(ResultsError::InvalidDocument(format!(
                    "document of collection {} is not a {}",
                    collection,
                    Self::KIND.type_name()
                )));
            }
        }
        Ok(serde_json::from_value(document)?)
    }

    /// Query matching this result on its unique fields
    fn unique_query(&self) -> Result<Query, ResultsError> {
        let document = self.to_document()?;
        Ok(Self::KIND
            .unique_fields()
            .iter()
            .map(|field| {
                (
                    field.to_string(),
                    document.get(*field).cloned().unwrap_or(Value::Null),
                )
            })
            .collect())
    }

    /// Insert this result and return the document id
    async fn insert(&self, service: &ResultsService) -> Result<String, ResultsError> {
        service.insert_one(self.to_document()?).await
    }

    /// Load the first result of this type matching the query
    async fn load_from_query(query: &Query, service: &ResultsService) -> Result<Self, ResultsError> {
        let collection = Self::KIND.collection();
        let document = service
            .find(collection, query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ResultsError::NotFound {
                collection: collection.to_string(),
            })?;
        Self::from_document(document)
    }
}

/// Inputs and outputs of one flow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericResult {
    /// Flow that produced the result
    pub flow_id: String,

    #[serde(default)]
    pub inputs: ValueMap,

    #[serde(default)]
    pub outputs: ValueMap,

    #[serde(default = "Utc::now")]
    pub date_modified: DateTime<Utc>,
}

impl GenericResult {
    /// Create a result stamped with the current time
    pub fn new(flow_id: impl Into<String>, inputs: ValueMap, outputs: ValueMap) -> Self {
        Self {
            flow_id: flow_id.into(),
            inputs,
            outputs,
            date_modified: Utc::now(),
        }
    }
}

impl ResultModel for GenericResult {
    const KIND: ResultKind = ResultKind::Generic;
}

/// Result of an IMPACT simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactResult {
    /// Flow that produced the result
    pub flow_id: String,

    #[serde(default)]
    pub inputs: ValueMap,

    #[serde(default)]
    pub outputs: ValueMap,

    #[serde(default = "Utc::now")]
    pub date_modified: DateTime<Utc>,

    /// Simulation archive
    pub archive: FileReference,

    /// Summary plot
    #[serde(default)]
    pub plot_file: Option<FileReference>,

    /// Time the process variables were collected
    pub pv_collection_isotime: DateTime<Utc>,

    /// Simulation configuration
    #[serde(default)]
    pub config: IndexMap<String, Value>,
}

impl ResultModel for ImpactResult {
    const KIND: ResultKind = ResultKind::Impact;
}

/// A result of any known type
#[derive(Debug, Clone, PartialEq)]
pub enum AnyResult {
    Generic(GenericResult),
    Impact(ImpactResult),
}

impl AnyResult {
    /// Rebuild a result, choosing the type from the document's collection
    pub fn from_document(document: Value) -> Result<Self, ResultsError> {
        let collection = document
            .get(COLLECTION_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| ResultsError::InvalidDocument("missing collection".to_string()))?;

        match collection.parse::<ResultKind>()? {
            ResultKind::Generic => GenericResult::from_document(document).map(AnyResult::Generic),
            ResultKind::Impact => ImpactResult::from_document(document).map(AnyResult::Impact),
        }
    }

    /// Result type
    pub fn kind(&self) -> ResultKind {
        match self {
            AnyResult::Generic(_) => ResultKind::Generic,
            AnyResult::Impact(_) => ResultKind::Impact,
        }
    }

    /// Flow that produced the result
    pub fn flow_id(&self) -> &str {
        match self {
            AnyResult::Generic(result) => &result.flow_id,
            AnyResult::Impact(result) => &result.flow_id,
        }
    }
}
