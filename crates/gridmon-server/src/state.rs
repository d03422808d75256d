use crate::collection::ZoneCollection;
use crate::config::ServerConfig;
use crate::location::LocationService;
use crate::scheduler::{CollectionScheduler, ConfigChangeDetector, RunOutcome, RunReport, UnitOfWork};
use crate::store::JsonFileStore;
use crate::trigger::CollectionTrigger;
use chrono::{DateTime, Utc};
use gridmon_common::types::AppStatus;
use gridmon_provider::{build_provider, ZoneProvider, ZoneResolver};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use utoipa::ToSchema;

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct HealthSnapshot {
    pub status: AppStatus,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Overall application health, folded from run reports and store failures.
#[derive(Default)]
pub struct HealthStatus {
    inner: Mutex<HealthSnapshot>,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Failures degrade health until the next successful run; cancellations are neutral.
    pub fn apply(&self, report: &RunReport) {
        let mut inner = self.lock();
        match &report.outcome {
            RunOutcome::Succeeded => {
                inner.status = AppStatus::Ok;
                inner.last_success_at = Some(report.finished_at);
                inner.last_error = None;
            }
            RunOutcome::Failed(error) => {
                inner.status = AppStatus::Error;
                inner.last_error = Some(error.clone());
            }
            RunOutcome::Cancelled => {}
        }
    }

    pub fn mark(&self, status: AppStatus, error: impl Into<String>) {
        let mut inner = self.lock();
        if inner.status != status {
            tracing::warn!(from = %inner.status, to = %status, "App status changed");
        }
        inner.status = status;
        inner.last_error = Some(error.into());
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HealthSnapshot> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<JsonFileStore>,
    pub provider: Arc<dyn ZoneProvider>,
    pub scheduler: CollectionScheduler,
    pub collection: Arc<dyn UnitOfWork>,
    pub locations: Arc<LocationService>,
    pub health: Arc<HealthStatus>,
    pub start_time: DateTime<Utc>,
}

impl AppState {
    /// Open the store and build the provider client from `config`.
    pub async fn build(config: ServerConfig) -> anyhow::Result<Self> {
        let provider: Arc<dyn ZoneProvider> = Arc::from(build_provider(&config.provider)?);
        let store = Arc::new(JsonFileStore::open(config.store_path()).await?);
        Ok(Self::with_parts(config, store, provider))
    }

    pub fn with_parts(
        config: ServerConfig,
        store: Arc<JsonFileStore>,
        provider: Arc<dyn ZoneProvider>,
    ) -> Self {
        let scheduler = CollectionScheduler::new(
            Arc::new(ConfigChangeDetector::new()),
            config.collection.cancel_grace(),
        );
        let collection: Arc<dyn UnitOfWork> = Arc::new(ZoneCollection::new(
            store.clone(),
            store.clone(),
            provider.clone(),
            config.provider.max_concurrent,
        ));
        let resolver = ZoneResolver::new(provider.clone())
            .with_threshold(config.collection.match_threshold);
        let locations = Arc::new(LocationService::new(
            resolver,
            store.clone(),
            store.clone(),
            store.clone(),
            scheduler.clone(),
        ));

        Self {
            config: Arc::new(config),
            store,
            provider,
            scheduler,
            collection,
            locations,
            health: Arc::new(HealthStatus::new()),
            start_time: Utc::now(),
        }
    }

    pub fn trigger(&self) -> CollectionTrigger {
        CollectionTrigger::new(
            self.store.clone(),
            self.scheduler.clone(),
            self.collection.clone(),
            self.health.clone(),
            self.config.collection.tick_interval(),
        )
    }
}
