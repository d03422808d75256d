use crate::error::CollectError;
use crate::scheduler::UnitOfWork;
use crate::store::{AssetStore, DataSink};
use async_trait::async_trait;
use gridmon_common::types::{Asset, Configuration, DataSubtype};
use gridmon_provider::collector::ZoneDataCollector;
use gridmon_provider::{ZoneData, ZoneProvider};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of a successful collection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectSummary {
    pub assets: usize,
    pub written: usize,
}

/// Fetches zone data for every tracked asset and writes it back as input data.
pub struct ZoneCollection {
    assets: Arc<dyn AssetStore>,
    sink: Arc<dyn DataSink>,
    provider: Arc<dyn ZoneProvider>,
    max_concurrent: usize,
}

impl ZoneCollection {
    pub fn new(
        assets: Arc<dyn AssetStore>,
        sink: Arc<dyn DataSink>,
        provider: Arc<dyn ZoneProvider>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            assets,
            sink,
            provider,
            max_concurrent,
        }
    }

    /// One collection pass for `config`.
    ///
    /// Assets outside the configured projects are skipped. Zones shared by several assets
    /// are fetched once. When some zones fail, the others are still written and the
    /// pass then fails with the first error.
    pub async fn collect(
        &self,
        cancel: &CancellationToken,
        config: &Configuration,
    ) -> Result<CollectSummary, CollectError> {
        let assets: Vec<Asset> = self
            .assets
            .list_assets()
            .await?
            .into_iter()
            .filter(|a| config.covers_project(&a.project_id))
            .collect();

        if assets.is_empty() {
            tracing::debug!(config_id = config.id, "No assets to collect");
            return Ok(CollectSummary {
                assets: 0,
                written: 0,
            });
        }

        let collector = ZoneDataCollector::new(Arc::clone(&self.provider), self.max_concurrent)
            .with_timeout(config.request_timeout());
        let zones = collector
            .collect_all(
                assets.iter().map(|a| a.location_id.clone()),
                &config.api_key,
                cancel,
            )
            .await;

        if cancel.is_cancelled() {
            return Err(CollectError::Cancelled);
        }

        let missing = assets
            .iter()
            .map(|a| a.location_id.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|zone| !zones.contains_key(*zone))
            .count();
        let failed = zones.values().filter(|r| r.is_err()).count() + missing;
        let mut first_error = None;
        let mut written = 0;

        for asset in &assets {
            if cancel.is_cancelled() {
                return Err(CollectError::Cancelled);
            }
            match zones.get(&asset.location_id) {
                Some(Ok(data)) => {
                    self.sink
                        .upsert_data(asset.asset_id, DataSubtype::Input, zone_attributes(data))
                        .await?;
                    written += 1;
                }
                Some(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(CollectError::from_provider(&asset.location_id, e, failed));
                    }
                }
                None => {
                    if first_error.is_none() {
                        first_error = Some(CollectError::MissingResult {
                            zone: asset.location_id.clone(),
                            failed,
                        });
                    }
                }
            }
        }

        tracing::info!(
            config_id = config.id,
            assets = assets.len(),
            written,
            failed_zones = failed,
            "Zone data written"
        );

        match first_error {
            Some(err) => Err(err),
            None => Ok(CollectSummary {
                assets: assets.len(),
                written,
            }),
        }
    }
}

#[async_trait]
impl UnitOfWork for ZoneCollection {
    async fn run(&self, cancel: CancellationToken, config: Configuration) -> anyhow::Result<()> {
        self.collect(&cancel, &config).await?;
        Ok(())
    }
}

/// Attributes written for each asset: zone code plus the three headline figures.
pub fn zone_attributes(data: &ZoneData) -> Map<String, Value> {
    let mut attributes = Map::new();
    attributes.insert("name".to_string(), json!(data.zone));
    attributes.insert("carbon_intensity".to_string(), json!(data.carbon_intensity));
    attributes.insert(
        "renewable_percentage".to_string(),
        json!(data.renewable_percentage),
    );
    attributes.insert(
        "fossil_free_percentage".to_string(),
        json!(data.fossil_free_percentage),
    );
    attributes
}
