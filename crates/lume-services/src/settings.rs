//! Settings for Lume services
//!
//! Defaults are overridden from `LUME_*` environment variables.

use lume_monitoring::MonitoringConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::error::SettingsError;

/// Which execution backend to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Server,
}

impl FromStr for BackendKind {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "server" => Ok(BackendKind::Server),
            _ => Err(SettingsError::Invalid {
                key: "LUME_BACKEND".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => f.write_str("local"),
            BackendKind::Server => f.write_str("server"),
        }
    }
}

/// Results database settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsDbSettings {
    /// `memory://` or a `sqlite:` URL
    #[serde(default = "default_results_db_url")]
    pub url: String,

    /// Pool size for file-backed databases
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Scheduler server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Base URL of the scheduler API; required for the server backend
    #[serde(default)]
    pub api_url: Option<String>,

    /// Bearer token for the scheduler API
    #[serde(default)]
    pub api_token: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay between run state checks in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on waiting for a run in seconds
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

impl SchedulerSettings {
    /// Delay between run state checks
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Upper bound on waiting for a run
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LumeSettings {
    pub results_db: ResultsDbSettings,

    #[serde(default)]
    pub backend: BackendKind,

    pub scheduler: SchedulerSettings,

    /// Filter directives used when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Emit JSON logs
    #[serde(default)]
    pub log_json: bool,
}

fn default_results_db_url() -> String {
    "memory://".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_run_timeout_secs() -> u64 {
    3600 // 1 hour
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for ResultsDbSettings {
    fn default() -> Self {
        Self {
            url: default_results_db_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            api_url: None,
            api_token: None,
            timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

impl Default for LumeSettings {
    fn default() -> Self {
        Self {
            results_db: ResultsDbSettings::default(),
            backend: BackendKind::default(),
            scheduler: SchedulerSettings::default(),
            log_filter: default_log_filter(),
            log_json: false,
        }
    }
}

/// Parse a numeric override, keeping the current value when it does not parse
fn parse_or_warn<T: FromStr>(key: &str, raw: String, current: &mut T) {
    match raw.parse::<T>() {
        Ok(value) => *current = value,
        Err(_) => warn!("Invalid {} value: {}", key, raw),
    }
}

impl LumeSettings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through a variable lookup, then validate them
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(url) = lookup("LUME_RESULTS_DB_URL") {
            settings.results_db.url = url;
        }

        if let Some(max) = lookup("LUME_RESULTS_DB_MAX_CONNECTIONS") {
            parse_or_warn(
                "LUME_RESULTS_DB_MAX_CONNECTIONS",
                max,
                &mut settings.results_db.max_connections,
            );
        }

        if let Some(backend) = lookup("LUME_BACKEND") {
            settings.backend = backend.parse()?;
        }

        if let Some(api_url) = lookup("LUME_SCHEDULER_API_URL") {
            settings.scheduler.api_url = Some(api_url);
        }

        if let Some(token) = lookup("LUME_SCHEDULER_API_TOKEN") {
            settings.scheduler.api_token = Some(token);
        }

        if let Some(timeout) = lookup("LUME_SCHEDULER_TIMEOUT_SECS") {
            parse_or_warn(
                "LUME_SCHEDULER_TIMEOUT_SECS",
                timeout,
                &mut settings.scheduler.timeout_secs,
            );
        }

        if let Some(interval) = lookup("LUME_SCHEDULER_POLL_INTERVAL_MS") {
            parse_or_warn(
                "LUME_SCHEDULER_POLL_INTERVAL_MS",
                interval,
                &mut settings.scheduler.poll_interval_ms,
            );
        }

        if let Some(timeout) = lookup("LUME_SCHEDULER_RUN_TIMEOUT_SECS") {
            parse_or_warn(
                "LUME_SCHEDULER_RUN_TIMEOUT_SECS",
                timeout,
                &mut settings.scheduler.run_timeout_secs,
            );
        }

        if let Some(filter) = lookup("LUME_LOG_FILTER") {
            settings.log_filter = filter;
        }

        if let Some(json) = lookup("LUME_LOG_JSON") {
            settings.log_json = json.to_lowercase() == "true" || json == "1";
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Check settings that depend on each other
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.backend == BackendKind::Server && self.scheduler.api_url.is_none() {
            return Err(SettingsError::Missing("LUME_SCHEDULER_API_URL".to_string()));
        }

        let url = &self.results_db.url;
        if !(url.starts_with("memory://") || url.starts_with("sqlite:")) {
            return Err(SettingsError::Invalid {
                key: "LUME_RESULTS_DB_URL".to_string(),
                value: url.clone(),
            });
        }

        Ok(())
    }

    /// Logging configuration derived from these settings
    pub fn monitoring_config(&self) -> MonitoringConfig {
        MonitoringConfig {
            service_name: "lume".to_string(),
            log_filter: self.log_filter.clone(),
            enable_json_logging: self.log_json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<LumeSettings, SettingsError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LumeSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = load(&[]).unwrap();
        assert_eq!(settings, LumeSettings::default());
        assert_eq!(settings.backend, BackendKind::Local);
        assert_eq!(settings.results_db.url, "memory://");
    }

    #[test]
    fn test_overrides() {
        let settings = load(&[
            ("LUME_BACKEND", "Server"),
            ("LUME_SCHEDULER_API_URL", "http://scheduler:4200"),
            ("LUME_SCHEDULER_POLL_INTERVAL_MS", "250"),
            ("LUME_RESULTS_DB_URL", "sqlite::memory:"),
            ("LUME_LOG_JSON", "1"),
        ])
        .unwrap();

        assert_eq!(settings.backend, BackendKind::Server);
        assert_eq!(settings.scheduler.poll_interval(), Duration::from_millis(250));
        assert!(settings.monitoring_config().enable_json_logging);
    }

    #[test]
    fn test_unparsable_number_keeps_default() {
        let settings = load(&[("LUME_SCHEDULER_TIMEOUT_SECS", "soon")]).unwrap();
        assert_eq!(settings.scheduler.timeout_secs, 30);
    }

    #[test]
    fn test_server_backend_requires_url() {
        assert_eq!(
            load(&[("LUME_BACKEND", "server")]).unwrap_err(),
            SettingsError::Missing("LUME_SCHEDULER_API_URL".to_string())
        );
    }

    #[test]
    fn test_unknown_backend_and_db_url() {
        assert!(matches!(
            load(&[("LUME_BACKEND", "cluster")]),
            Err(SettingsError::Invalid { key, .. }) if key == "LUME_BACKEND"
        ));
        assert!(matches!(
            load(&[("LUME_RESULTS_DB_URL", "mongodb://localhost")]),
            Err(SettingsError::Invalid { key, .. }) if key == "LUME_RESULTS_DB_URL"
        ));
    }
}
