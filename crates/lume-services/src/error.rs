use lume_results::ResultsError;
use lume_scheduling::SchedulingError;
use thiserror::Error;

/// Errors raised while loading settings
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// A required setting is absent
    #[error("Missing required setting: {0}")]
    Missing(String),

    /// A setting has a value that cannot be used
    #[error("Invalid value for {key}: {value}")]
    Invalid {
        /// Environment variable name
        key: String,
        /// Offending value
        value: String,
    },
}

/// Errors raised while building services
#[derive(Error, Debug)]
pub enum ServicesError {
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Results error: {0}")]
    Results(#[from] ResultsError),

    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),
}

impl ServicesError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            ServicesError::Settings(SettingsError::Missing(_)) => "ERR_SETTINGS_MISSING",
            ServicesError::Settings(SettingsError::Invalid { .. }) => "ERR_SETTINGS_INVALID",
            ServicesError::Results(e) => e.error_code(),
            ServicesError::Scheduling(e) => e.error_code(),
        }
    }
}
