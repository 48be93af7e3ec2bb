//! # Lume Results
//!
//! Persistence of flow results: typed result models, references to files
//! produced by runs, and document stores keyed by collection with
//! unique-field enforcement.

mod error;
mod service;
mod value;

pub mod files;
pub mod models;
pub mod store;

pub use error::ResultsError;
pub use files::{
    BytesSerializer, FileKind, FileReference, JsonSerializer, LocalFilesystem, Serializer,
    TextSerializer,
};
pub use models::{collections, AnyResult, GenericResult, ImpactResult, ResultKind, ResultModel};
pub use service::ResultsService;
pub use store::{InMemoryResultsStore, Query, ResultsStore, SqlResultsStore};
pub use value::{DataFrame, NdArray, ResultValue, ValueMap};

/// Returns a version string for the crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
