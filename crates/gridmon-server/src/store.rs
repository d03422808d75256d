//! Persistence collaborators: the tenant configuration, tracked assets and the data
//! written back to them.
//!
//! [`JsonFileStore`] keeps everything in one JSON document. Every mutation builds the new
//! document, writes it to a temporary file, renames it over the old one and only then
//! publishes it in memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridmon_common::types::{Asset, Configuration, DataSubtype};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use utoipa::ToSchema;

pub const STORE_FILE_NAME: &str = "gridmon.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("{entity} already exists: {key}")]
    Conflict { entity: &'static str, key: String },

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// One attribute set written to an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DataRecord {
    #[schema(value_type = Object)]
    pub attributes: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

/// Latest record per subtype for one asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AssetData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<DataRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<DataRecord>,
}

impl AssetData {
    fn slot(&mut self, subtype: DataSubtype) -> &mut Option<DataRecord> {
        match subtype {
            DataSubtype::Input => &mut self.input,
            DataSubtype::Property => &mut self.property,
        }
    }
}

#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// The tenant configuration, or [`StoreError::NotFound`] before one was written.
    async fn current_configuration(&self) -> Result<Configuration>;

    async fn put_configuration(&self, config: Configuration) -> Result<()>;
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn list_assets(&self) -> Result<Vec<Asset>>;

    /// Look up a tracked asset by its host platform id.
    async fn get_asset(&self, asset_id: i32) -> Result<Asset>;

    async fn insert_asset(&self, project_id: &str, asset_id: i32, location_id: &str)
        -> Result<Asset>;

    /// Change the zone of the asset with store row id `id`.
    async fn update_asset_location(&self, id: i64, location_id: &str) -> Result<Asset>;
}

#[async_trait]
pub trait DataSink: Send + Sync {
    /// Replace the `subtype` record of `asset_id` with `attributes`.
    async fn upsert_data(
        &self,
        asset_id: i32,
        subtype: DataSubtype,
        attributes: Map<String, Value>,
    ) -> Result<()>;

    async fn asset_data(&self, asset_id: i32) -> Result<AssetData>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    configuration: Option<Configuration>,
    #[serde(default)]
    assets: Vec<Asset>,
    #[serde(default)]
    next_asset_row: i64,
    #[serde(default)]
    data: BTreeMap<i32, AssetData>,
}

pub struct JsonFileStore {
    path: PathBuf,
    document: RwLock<StoreDocument>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty when the file does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let document = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            path = %path.display(),
            assets = document.assets.len(),
            configured = document.configuration.is_some(),
            "Store opened"
        );

        Ok(Self {
            path,
            document: RwLock::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy of the document, persist it and publish it.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut StoreDocument) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.document.write().await;
        let mut next = guard.clone();
        let value = change(&mut next)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&next)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        *guard = next;
        Ok(value)
    }
}

#[async_trait]
impl ConfigSource for JsonFileStore {
    async fn current_configuration(&self) -> Result<Configuration> {
        self.document
            .read()
            .await
            .configuration
            .clone()
            .ok_or(StoreError::NotFound {
                entity: "configuration",
                key: "current".to_string(),
            })
    }

    async fn put_configuration(&self, config: Configuration) -> Result<()> {
        let id = config.id;
        self.mutate(|doc| {
            doc.configuration = Some(config);
            Ok(())
        })
        .await?;
        tracing::info!(config_id = id, "Configuration stored");
        Ok(())
    }
}

#[async_trait]
impl AssetStore for JsonFileStore {
    async fn list_assets(&self) -> Result<Vec<Asset>> {
        Ok(self.document.read().await.assets.clone())
    }

    async fn get_asset(&self, asset_id: i32) -> Result<Asset> {
        self.document
            .read()
            .await
            .assets
            .iter()
            .find(|a| a.asset_id == asset_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "asset",
                key: asset_id.to_string(),
            })
    }

    async fn insert_asset(
        &self,
        project_id: &str,
        asset_id: i32,
        location_id: &str,
    ) -> Result<Asset> {
        self.mutate(|doc| {
            if doc.assets.iter().any(|a| a.asset_id == asset_id) {
                return Err(StoreError::Conflict {
                    entity: "asset",
                    key: asset_id.to_string(),
                });
            }
            doc.next_asset_row += 1;
            let asset = Asset {
                id: doc.next_asset_row,
                project_id: project_id.to_string(),
                asset_id,
                location_id: location_id.to_string(),
            };
            doc.assets.push(asset.clone());
            Ok(asset)
        })
        .await
    }

    async fn update_asset_location(&self, id: i64, location_id: &str) -> Result<Asset> {
        self.mutate(|doc| {
            let asset = doc
                .assets
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or(StoreError::NotFound {
                    entity: "asset",
                    key: id.to_string(),
                })?;
            asset.location_id = location_id.to_string();
            Ok(asset.clone())
        })
        .await
    }
}

#[async_trait]
impl DataSink for JsonFileStore {
    async fn upsert_data(
        &self,
        asset_id: i32,
        subtype: DataSubtype,
        attributes: Map<String, Value>,
    ) -> Result<()> {
        self.mutate(|doc| {
            *doc.data.entry(asset_id).or_default().slot(subtype) = Some(DataRecord {
                attributes,
                updated_at: Utc::now(),
            });
            Ok(())
        })
        .await
    }

    async fn asset_data(&self, asset_id: i32) -> Result<AssetData> {
        self.document
            .read()
            .await
            .data
            .get(&asset_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "asset data",
                key: asset_id.to_string(),
            })
    }
}
