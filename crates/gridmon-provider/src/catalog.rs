use crate::error::Result;
use crate::{Zone, ZoneProvider};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Snapshot of every zone the provider exposes to one API key.
///
/// A catalog is built completely and never mutated afterwards; a refresh produces a
/// new catalog that replaces the old one wholesale. Zones iterate in ascending code order.
#[derive(Debug, Clone)]
pub struct ZoneCatalog {
    zones: BTreeMap<String, Zone>,
    fetched_at: DateTime<Utc>,
}

impl ZoneCatalog {
    /// Fetch the current zone list from the provider.
    ///
    /// # Errors
    ///
    /// Propagates the provider error unchanged; there is no retry.
    pub async fn refresh(provider: &dyn ZoneProvider, api_key: &str) -> Result<Self> {
        let zones = provider.list_zones(api_key).await?;
        tracing::debug!(
            provider = provider.name(),
            zones = zones.len(),
            "Zone catalog refreshed"
        );
        Ok(Self {
            zones,
            fetched_at: Utc::now(),
        })
    }

    pub fn from_zones(zones: impl IntoIterator<Item = Zone>) -> Self {
        Self {
            zones: zones.into_iter().map(|z| (z.code.clone(), z)).collect(),
            fetched_at: Utc::now(),
        }
    }

    pub fn get(&self, code: &str) -> Option<&Zone> {
        self.zones.get(code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Render the catalog as `"Name(CODE), Name(CODE)"` for user-facing hints.
    pub fn available_listing(&self) -> String {
        self.zones
            .values()
            .map(|z| format!("{}({})", z.zone_name, z.code))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
