use crate::dashboard::DashboardMetadata;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingConfig {
    /// Public base URL of the dashboard application, used in rule links.
    #[serde(default = "default_app_url")]
    pub app_url: String,
    /// Upper bound on the wall time of one evaluation attempt.
    #[serde(default = "default_evaluation_timeout_secs")]
    pub evaluation_timeout_secs: u64,
    /// Attempts the scheduler may make per evaluation. Read by the
    /// scheduler only.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            app_url: default_app_url(),
            evaluation_timeout_secs: default_evaluation_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_app_url() -> String {
    "http://localhost:3000/".to_string()
}

fn default_evaluation_timeout_secs() -> u64 {
    20
}

fn default_max_attempts() -> u32 {
    3
}

impl AlertingConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// `app_url` with exactly one trailing `/`.
    pub fn app_url(&self) -> String {
        format!("{}/", self.app_url.trim_end_matches('/'))
    }

    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_secs(self.evaluation_timeout_secs)
    }
}

/// Read-only configuration plus the capabilities every evaluation needs.
///
/// Built once at startup and cloned into each worker.
#[derive(Clone)]
pub struct AlertServices {
    config: Arc<AlertingConfig>,
    app_url: Arc<str>,
    dashboards: Arc<dyn DashboardMetadata>,
}

impl AlertServices {
    pub fn new(config: AlertingConfig, dashboards: Arc<dyn DashboardMetadata>) -> Self {
        let app_url: Arc<str> = config.app_url().into();
        Self {
            config: Arc::new(config),
            app_url,
            dashboards,
        }
    }

    pub fn config(&self) -> &AlertingConfig {
        &self.config
    }

    pub fn app_url(&self) -> &Arc<str> {
        &self.app_url
    }

    pub fn dashboards(&self) -> &Arc<dyn DashboardMetadata> {
        &self.dashboards
    }

    pub fn evaluation_timeout(&self) -> Duration {
        self.config.evaluation_timeout()
    }
}

impl std::fmt::Debug for AlertServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertServices")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
