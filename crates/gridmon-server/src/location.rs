use crate::error::LocationError;
use crate::scheduler::CollectionScheduler;
use crate::store::{AssetStore, ConfigSource, DataSink};
use gridmon_common::types::{Asset, DataSubtype};
use gridmon_provider::{ResolveError, Zone, ZoneResolver};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LocationAssignment {
    pub asset: Asset,
    pub zone: Zone,
    /// Label written to the asset's `name` property, e.g. "CH - Switzerland".
    pub label: String,
    /// Whether the asset was tracked for the first time.
    pub created: bool,
}

/// Binds assets to provider zones from user-entered location names.
pub struct LocationService {
    resolver: ZoneResolver,
    config: Arc<dyn ConfigSource>,
    assets: Arc<dyn AssetStore>,
    sink: Arc<dyn DataSink>,
    scheduler: CollectionScheduler,
}

impl LocationService {
    pub fn new(
        resolver: ZoneResolver,
        config: Arc<dyn ConfigSource>,
        assets: Arc<dyn AssetStore>,
        sink: Arc<dyn DataSink>,
        scheduler: CollectionScheduler,
    ) -> Self {
        Self {
            resolver,
            config,
            assets,
            sink,
            scheduler,
        }
    }

    /// Resolve `name` and bind asset `asset_id` to the matching zone.
    ///
    /// The outcome is always mirrored into the asset's `name` property: the zone label on
    /// success, or the list of available zones when nothing matched. A successful
    /// assignment asks every live collection run to restart so the new zone is picked up.
    pub async fn apply(
        &self,
        asset_id: i32,
        project_id: &str,
        name: &str,
    ) -> Result<LocationAssignment, LocationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LocationError::EmptyName);
        }

        let config = self.config.current_configuration().await?;
        let catalog = self.resolver.catalog(&config.api_key).await?;

        let zone = match self.resolver.locate(&catalog, name) {
            Ok(zone) => zone,
            Err(ResolveError::NotFound { .. }) => {
                let available = catalog.available_listing();
                let message = format!("Location not found. Available: {available}");
                if let Err(e) = self
                    .sink
                    .upsert_data(asset_id, DataSubtype::Property, name_property(message))
                    .await
                {
                    tracing::warn!(asset_id, error = %e, "Failed to write location hint");
                }
                tracing::info!(asset_id, location = %name, "Location not found");
                return Err(LocationError::NotFound {
                    name: name.to_string(),
                    available,
                });
            }
            Err(ResolveError::Provider(e)) => return Err(e.into()),
        };

        let label = zone.display_label();
        self.sink
            .upsert_data(asset_id, DataSubtype::Property, name_property(label.clone()))
            .await?;

        let (asset, created) = match self.assets.get_asset(asset_id).await {
            Ok(existing) => (
                self.assets
                    .update_asset_location(existing.id, &zone.code)
                    .await?,
                false,
            ),
            Err(e) if e.is_not_found() => (
                self.assets
                    .insert_asset(project_id, asset_id, &zone.code)
                    .await?,
                true,
            ),
            Err(e) => return Err(e.into()),
        };

        let signalled = self.scheduler.notify_all();
        tracing::info!(
            asset_id,
            location = %name,
            zone = %zone.code,
            created,
            signalled,
            "Asset location assigned"
        );

        Ok(LocationAssignment {
            asset,
            zone,
            label,
            created,
        })
    }
}

fn name_property(value: String) -> Map<String, Value> {
    let mut attributes = Map::new();
    attributes.insert("name".to_string(), json!(value));
    attributes
}
