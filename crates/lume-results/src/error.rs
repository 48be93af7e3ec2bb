use thiserror::Error;

/// Errors raised by result models, files and stores
#[derive(Error, Debug)]
pub enum ResultsError {
    /// A document with the same unique fields already exists
    #[error("Duplicate key in collection {collection}: {key}")]
    DuplicateKey {
        /// Collection name
        collection: String,
        /// Hash of the unique fields
        key: String,
    },

    /// The result type string does not name a known result type
    #[error("Unknown result type: {0}")]
    UnknownResultType(String),

    /// The document does not have the expected shape
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// No document matched the query
    #[error("No document in collection {collection} matches the query")]
    NotFound {
        /// Collection name
        collection: String,
    },

    /// Encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(String),

    /// Misconfigured store or filesystem
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Input/output errors
    #[error("Input/output error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResultsError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            ResultsError::DuplicateKey { .. } => "ERR_RESULTS_DUPLICATE_KEY",
            ResultsError::UnknownResultType(_) => "ERR_RESULTS_UNKNOWN_RESULT_TYPE",
            ResultsError::InvalidDocument(_) => "ERR_RESULTS_INVALID_DOCUMENT",
            ResultsError::NotFound { .. } => "ERR_RESULTS_NOT_FOUND",
            ResultsError::Serialization(_) => "ERR_RESULTS_SERIALIZATION",
            ResultsError::Database(_) => "ERR_RESULTS_DATABASE",
            ResultsError::Configuration(_) => "ERR_RESULTS_CONFIGURATION",
            ResultsError::Io(_) => "ERR_RESULTS_IO",
        }
    }
}

impl From<serde_json::Error> for ResultsError {
    fn from(err: serde_json::Error) -> Self {
        ResultsError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for ResultsError {
    fn from(err: sqlx::Error) -> Self {
        ResultsError::Database(err.to_string())
    }
}
