pub mod catalog;
pub mod collector;
pub mod electricity_maps;
pub mod error;
pub mod resolver;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use utoipa::ToSchema;

pub use catalog::ZoneCatalog;
pub use error::ProviderError;
pub use resolver::{locate, ResolveError, ZoneResolver};

/// Provider-defined geographic region with its own electricity-mix feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    /// Canonical zone code, e.g. "DE" or "US-CAL-CISO". Taken from the map key on fetch.
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub zone_name: String,
    /// Capability scope of the API key for this zone; not used for matching.
    #[serde(default)]
    pub access: BTreeSet<String>,
}

impl Zone {
    pub fn new(code: impl Into<String>, zone_name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            zone_name: zone_name.into(),
            access: BTreeSet::new(),
        }
    }

    /// Human-readable label written back to assets, e.g. "CH - Switzerland".
    pub fn display_label(&self) -> String {
        format!("{} - {}", self.code, self.zone_name)
    }
}

/// Power per source in MW. Missing sources are reported as `null` by the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerBreakdown {
    pub nuclear: Option<f64>,
    pub geothermal: Option<f64>,
    pub biomass: Option<f64>,
    pub coal: Option<f64>,
    pub wind: Option<f64>,
    pub solar: Option<f64>,
    pub hydro: Option<f64>,
    pub gas: Option<f64>,
    pub oil: Option<f64>,
    pub unknown: Option<f64>,
    #[serde(rename = "hydro discharge")]
    pub hydro_discharge: Option<f64>,
    #[serde(rename = "battery discharge")]
    pub battery_discharge: Option<f64>,
}

/// `GET /carbon-intensity/latest` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarbonIntensity {
    pub zone: String,
    pub carbon_intensity: Option<f64>,
    pub datetime: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub emission_factor_type: Option<String>,
    #[serde(default)]
    pub is_estimated: bool,
    #[serde(default)]
    pub estimation_method: Option<String>,
}

/// `GET /power-breakdown/latest` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerBreakdownReport {
    pub zone: String,
    pub datetime: DateTime<Utc>,
    #[serde(default)]
    pub power_consumption_breakdown: PowerBreakdown,
    #[serde(default)]
    pub power_production_breakdown: PowerBreakdown,
    #[serde(default)]
    pub power_import_breakdown: BTreeMap<String, f64>,
    #[serde(default)]
    pub power_export_breakdown: BTreeMap<String, f64>,
    pub fossil_free_percentage: Option<f64>,
    pub renewable_percentage: Option<f64>,
    pub power_consumption_total: Option<f64>,
    pub power_production_total: Option<f64>,
    pub power_import_total: Option<f64>,
    pub power_export_total: Option<f64>,
    #[serde(default)]
    pub is_estimated: bool,
    #[serde(default)]
    pub estimation_method: Option<String>,
}

/// Carbon intensity and power breakdown of one zone, merged into a single record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneData {
    pub zone: String,
    pub carbon_intensity: Option<f64>,
    pub datetime: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub emission_factor_type: Option<String>,
    pub is_estimated: bool,
    pub estimation_method: Option<String>,
    pub power_consumption_breakdown: PowerBreakdown,
    pub power_production_breakdown: PowerBreakdown,
    pub power_import_breakdown: BTreeMap<String, f64>,
    pub power_export_breakdown: BTreeMap<String, f64>,
    pub fossil_free_percentage: Option<f64>,
    pub renewable_percentage: Option<f64>,
    pub power_consumption_total: Option<f64>,
    pub power_production_total: Option<f64>,
    pub power_import_total: Option<f64>,
    pub power_export_total: Option<f64>,
}

impl ZoneData {
    /// Carbon intensity metadata wins for the shared fields.
    pub fn merge(carbon: CarbonIntensity, power: PowerBreakdownReport) -> Self {
        Self {
            zone: carbon.zone,
            carbon_intensity: carbon.carbon_intensity,
            datetime: carbon.datetime,
            updated_at: carbon.updated_at,
            created_at: carbon.created_at,
            emission_factor_type: carbon.emission_factor_type,
            is_estimated: carbon.is_estimated,
            estimation_method: carbon.estimation_method,
            power_consumption_breakdown: power.power_consumption_breakdown,
            power_production_breakdown: power.power_production_breakdown,
            power_import_breakdown: power.power_import_breakdown,
            power_export_breakdown: power.power_export_breakdown,
            fossil_free_percentage: power.fossil_free_percentage,
            renewable_percentage: power.renewable_percentage,
            power_consumption_total: power.power_consumption_total,
            power_production_total: power.power_production_total,
            power_import_total: power.power_import_total,
            power_export_total: power.power_export_total,
        }
    }
}

/// Zone data provider abstraction.
///
/// Every call is a single request/response exchange; implementations never retry.
#[async_trait::async_trait]
pub trait ZoneProvider: Send + Sync {
    /// Provider name used in logs and errors (e.g., "electricitymaps").
    fn name(&self) -> &str;

    /// All zones visible to `api_key`, keyed by zone code.
    async fn list_zones(&self, api_key: &str) -> error::Result<BTreeMap<String, Zone>>;

    async fn latest_carbon_intensity(
        &self,
        zone: &str,
        api_key: &str,
    ) -> error::Result<CarbonIntensity>;

    async fn latest_power_breakdown(
        &self,
        zone: &str,
        api_key: &str,
    ) -> error::Result<PowerBreakdownReport>;

    /// Fetch carbon intensity first, then the power breakdown, and merge them.
    async fn zone_data(&self, zone: &str, api_key: &str) -> error::Result<ZoneData> {
        let carbon = self.latest_carbon_intensity(zone, api_key).await?;
        let power = self.latest_power_breakdown(zone, api_key).await?;
        Ok(ZoneData::merge(carbon, power))
    }
}

/// Provider connection settings (the `[provider]` table of the server config).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_type")]
    pub provider_type: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider_type: default_provider_type(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_provider_type() -> String {
    "electricitymaps".to_string()
}

fn default_base_url() -> String {
    electricity_maps::DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    5
}

/// Build a zone provider from settings.
///
/// # Errors
///
/// Returns [`ProviderError::ConfigError`] for an unknown `provider_type` or when the
/// HTTP client cannot be built.
pub fn build_provider(settings: &ProviderSettings) -> error::Result<Box<dyn ZoneProvider>> {
    match settings.provider_type.as_str() {
        "electricitymaps" => Ok(Box::new(electricity_maps::ElectricityMapsClient::new(
            &settings.base_url,
            std::time::Duration::from_secs(settings.timeout_secs),
        )?)),
        other => Err(ProviderError::ConfigError(format!(
            "Unsupported zone provider: {other}"
        ))),
    }
}

/// Check that `api_key` is accepted by the provider by listing its zones.
pub async fn verify_api_key(provider: &dyn ZoneProvider, api_key: &str) -> error::Result<()> {
    provider.list_zones(api_key).await.map(|_| ())
}
