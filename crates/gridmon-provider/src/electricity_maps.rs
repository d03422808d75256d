use crate::error::{ProviderError, Result};
use crate::{CarbonIntensity, PowerBreakdownReport, Zone, ZoneProvider};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.electricitymap.org/v3";

const PROVIDER_NAME: &str = "electricitymaps";
const AUTH_HEADER: &str = "auth-token";

/// Error payload returned with non-2xx responses.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
}

pub struct ElectricityMapsClient {
    base_url: String,
    client: Client,
}

impl ElectricityMapsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET `path` with the auth header and decode the JSON body.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        api_key: &str,
    ) -> Result<T> {
        let url = self.endpoint(path);
        tracing::debug!(url = %url, "Requesting zone provider");

        let response = self
            .client
            .get(&url)
            .query(query)
            .header(AUTH_HEADER, api_key)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Ok(parsed) = serde_json::from_str::<ErrorBody>(&body) {
                if !parsed.error.is_empty() {
                    return Err(ProviderError::ApiError {
                        provider: PROVIDER_NAME.to_string(),
                        status: status.as_u16(),
                        message: parsed.error,
                    });
                }
            }
            return Err(ProviderError::HttpError {
                provider: PROVIDER_NAME.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait::async_trait]
impl ZoneProvider for ElectricityMapsClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn list_zones(&self, api_key: &str) -> Result<BTreeMap<String, Zone>> {
        let mut zones: BTreeMap<String, Zone> = self.get_json("zones", &[], api_key).await?;
        for (code, zone) in zones.iter_mut() {
            zone.code = code.clone();
        }
        tracing::debug!(count = zones.len(), "Fetched zone list");
        Ok(zones)
    }

    async fn latest_carbon_intensity(&self, zone: &str, api_key: &str) -> Result<CarbonIntensity> {
        self.get_json("carbon-intensity/latest", &[("zone", zone)], api_key)
            .await
    }

    async fn latest_power_breakdown(
        &self,
        zone: &str,
        api_key: &str,
    ) -> Result<PowerBreakdownReport> {
        self.get_json("power-breakdown/latest", &[("zone", zone)], api_key)
            .await
    }
}
