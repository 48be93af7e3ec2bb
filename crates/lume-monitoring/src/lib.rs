//! Logging setup for Lume services.

use serde::{Deserialize, Serialize};

pub mod logging;

pub use logging::{init_logging, init_test_tracing, LogExt};

/// Configuration for initializing logging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Service name attached to the startup log line
    pub service_name: String,

    /// Filter directives used when `RUST_LOG` is not set
    pub log_filter: String,

    /// Emit JSON lines instead of human-readable output
    pub enable_json_logging: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: "lume".to_string(),
            log_filter: "info".to_string(),
            enable_json_logging: false,
        }
    }
}
