//! # Lume Services
//!
//! Builds the results service and the configured execution backend from
//! [`LumeSettings`].

use std::sync::Arc;

use lume_flows::FlowRegistry;
use lume_monitoring::LogExt;
use lume_results::{InMemoryResultsStore, ResultsService, ResultsStore, SqlResultsStore};
use lume_scheduling::{
    LocalBackend, SchedulerClient, SchedulerClientConfig, ServerBackend, ServerBackendConfig,
};
use tracing::info;

mod error;
pub mod settings;

pub use error::{ServicesError, SettingsError};
pub use settings::{BackendKind, LumeSettings, ResultsDbSettings, SchedulerSettings};

/// The execution backend selected by the settings
#[derive(Debug, Clone)]
pub enum ConfiguredBackend {
    Local(LocalBackend),
    Server(ServerBackend),
}

impl ConfiguredBackend {
    /// Kind of the backend
    pub fn kind(&self) -> BackendKind {
        match self {
            ConfiguredBackend::Local(_) => BackendKind::Local,
            ConfiguredBackend::Server(_) => BackendKind::Server,
        }
    }

    /// Flow registry for composition; only the server backend has one
    pub fn registry(&self) -> Option<&dyn FlowRegistry> {
        match self {
            ConfiguredBackend::Local(_) => None,
            ConfiguredBackend::Server(backend) => Some(backend.client() as &dyn FlowRegistry),
        }
    }
}

/// Services wired from settings
#[derive(Debug, Clone)]
pub struct LumeServices {
    pub settings: LumeSettings,
    pub results: ResultsService,
    pub backend: ConfiguredBackend,
}

impl LumeServices {
    /// Load settings from the environment and build every service
    pub async fn from_env() -> Result<Self, ServicesError> {
        let settings = LumeSettings::load().log_err("Failed to load settings")?;
        Self::from_settings(settings).await
    }

    /// Build every service from settings
    pub async fn from_settings(settings: LumeSettings) -> Result<Self, ServicesError> {
        settings.validate()?;

        let store: Arc<dyn ResultsStore> = if settings.results_db.url.starts_with("memory://") {
            Arc::new(InMemoryResultsStore::new())
        } else {
            let store = SqlResultsStore::connect(
                &settings.results_db.url,
                settings.results_db.max_connections,
            )
            .await
            .log_err("Failed to open results database")?;
            Arc::new(store)
        };

        let backend = match settings.backend {
            BackendKind::Local => ConfiguredBackend::Local(LocalBackend::new()),
            BackendKind::Server => {
                let api_url = settings
                    .scheduler
                    .api_url
                    .clone()
                    .ok_or_else(|| SettingsError::Missing("LUME_SCHEDULER_API_URL".to_string()))?;
                let client = SchedulerClient::new(SchedulerClientConfig {
                    api_url,
                    timeout_secs: settings.scheduler.timeout_secs,
                    api_token: settings.scheduler.api_token.clone(),
                })?;
                ConfiguredBackend::Server(ServerBackend::new(
                    client,
                    ServerBackendConfig {
                        poll_interval: settings.scheduler.poll_interval(),
                        run_timeout: settings.scheduler.run_timeout(),
                    },
                ))
            }
        };

        info!(
            backend = %backend.kind(),
            results_db = %settings.results_db.url,
            "Lume services initialized"
        );

        Ok(Self {
            settings,
            results: ResultsService::new(store),
            backend,
        })
    }

    /// Install the global logger described by the settings
    pub fn init_logging(&self) -> Result<(), ServicesError> {
        lume_monitoring::init_logging(&self.settings.monitoring_config()).map_err(|e| {
            ServicesError::Settings(SettingsError::Invalid {
                key: "LUME_LOG_FILTER".to_string(),
                value: e.to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_settings_build_local_services() {
        let services = LumeServices::from_settings(LumeSettings::default()).await.unwrap();
        assert_eq!(services.backend.kind(), BackendKind::Local);
        assert!(services.backend.registry().is_none());
        assert!(services.results.collections().await.unwrap().contains(&"generic".to_string()));
    }

    #[tokio::test]
    async fn test_server_settings_build_registry() {
        let mut settings = LumeSettings::default();
        settings.backend = BackendKind::Server;
        settings.scheduler.api_url = Some("http://localhost:4200".to_string());

        let services = LumeServices::from_settings(settings).await.unwrap();
        assert!(services.backend.registry().is_some());
    }

    #[tokio::test]
    async fn test_server_without_url_fails() {
        let mut settings = LumeSettings::default();
        settings.backend = BackendKind::Server;

        let err = LumeServices::from_settings(settings).await.unwrap_err();
        assert_eq!(err.error_code(), "ERR_SETTINGS_MISSING");
    }
}
