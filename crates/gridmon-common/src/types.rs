use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

/// Tenant collection configuration.
///
/// Each poll of the configuration source yields a fresh snapshot; two snapshots are the
/// same configuration exactly when they compare equal field by field.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Configuration {
    pub id: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    pub api_key: String,
    #[serde(default)]
    pub project_ids: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_refresh_interval_secs() -> u64 {
    3600
}

fn default_request_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("refresh_interval_secs must be greater than zero")]
    ZeroRefreshInterval,
    #[error("request_timeout_secs must be greater than zero")]
    ZeroRequestTimeout,
    #[error("api_key is required when the configuration is enabled")]
    MissingApiKey,
}

impl Configuration {
    /// Check the invariants the scheduler relies on.
    ///
    /// # Examples
    ///
    /// ```
    /// use gridmon_common::types::{Configuration, ConfigurationError};
    ///
    /// let mut config = Configuration::new(1, "secret");
    /// assert!(config.validate().is_ok());
    ///
    /// config.refresh_interval_secs = 0;
    /// assert_eq!(config.validate(), Err(ConfigurationError::ZeroRefreshInterval));
    /// ```
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.refresh_interval_secs == 0 {
            return Err(ConfigurationError::ZeroRefreshInterval);
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigurationError::ZeroRequestTimeout);
        }
        if self.enabled && self.api_key.trim().is_empty() {
            return Err(ConfigurationError::MissingApiKey);
        }
        Ok(())
    }

    /// Enabled configuration with default intervals and no project filter.
    pub fn new(id: i64, api_key: impl Into<String>) -> Self {
        Self {
            id,
            enabled: default_enabled(),
            refresh_interval_secs: default_refresh_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            api_key: api_key.into(),
            project_ids: Vec::new(),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whether assets of `project_id` belong to this configuration.
    /// An empty project list covers every project.
    pub fn covers_project(&self, project_id: &str) -> bool {
        self.project_ids.is_empty() || self.project_ids.iter().any(|p| p == project_id)
    }
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("id", &self.id)
            .field("enabled", &self.enabled)
            .field("refresh_interval_secs", &self.refresh_interval_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("api_key", &"***")
            .field("project_ids", &self.project_ids)
            .finish()
    }
}

/// A host-platform asset bound to a provider zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Asset {
    /// Store row id.
    pub id: i64,
    pub project_id: String,
    /// Asset id on the host platform.
    pub asset_id: i32,
    /// Resolved provider zone code.
    pub location_id: String,
}

/// Overall application health, reported by `GET /v1/health`.
///
/// # Examples
///
/// ```
/// use gridmon_common::types::AppStatus;
///
/// let status: AppStatus = "error".parse().unwrap();
/// assert_eq!(status, AppStatus::Error);
/// assert_eq!(status.code(), 1);
/// assert_eq!(AppStatus::Ok.to_string(), "ok");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    #[default]
    Ok,
    Error,
    Fatal,
}

impl AppStatus {
    pub fn code(&self) -> u8 {
        match self {
            AppStatus::Ok => 0,
            AppStatus::Error => 1,
            AppStatus::Fatal => 2,
        }
    }
}

impl std::fmt::Display for AppStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppStatus::Ok => write!(f, "ok"),
            AppStatus::Error => write!(f, "error"),
            AppStatus::Fatal => write!(f, "fatal"),
        }
    }
}

impl std::str::FromStr for AppStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ok" => Ok(AppStatus::Ok),
            "error" => Ok(AppStatus::Error),
            "fatal" => Ok(AppStatus::Fatal),
            _ => Err(format!("unknown app status: {s}")),
        }
    }
}

/// Kind of data written back to an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DataSubtype {
    /// Measurements collected from the provider.
    Input,
    /// User-facing attributes such as the resolved location label.
    Property,
}
