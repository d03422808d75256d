use gridmon_provider::ProviderSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// CORS origins; empty allows any origin.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,

    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub collection: CollectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            cors_allowed_origins: Vec::new(),
            provider: ProviderSettings::default(),
            collection: CollectionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default = "default_collection_enabled")]
    pub enabled: bool,
    /// How often the trigger re-reads the configuration and ticks the scheduler.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// How long a superseded run may take to honor cancellation.
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
    /// Location matches must rank strictly below this value.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            enabled: default_collection_enabled(),
            tick_secs: default_tick_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
            match_threshold: default_match_threshold(),
        }
    }
}

impl CollectionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_collection_enabled() -> bool {
    true
}

fn default_tick_secs() -> u64 {
    10
}

fn default_cancel_grace_secs() -> u64 {
    30
}

fn default_match_threshold() -> usize {
    gridmon_provider::resolver::MATCH_THRESHOLD
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(crate::store::STORE_FILE_NAME)
    }
}
