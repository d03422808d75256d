use crate::scheduler::{CollectionScheduler, TickOutcome, UnitOfWork};
use crate::state::HealthStatus;
use crate::store::ConfigSource;
use gridmon_common::types::AppStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

/// Periodically feeds the stored configuration to the scheduler and tracks run health.
pub struct CollectionTrigger {
    config: Arc<dyn ConfigSource>,
    scheduler: CollectionScheduler,
    work: Arc<dyn UnitOfWork>,
    health: Arc<HealthStatus>,
    tick_interval: Duration,
    missing_logged: AtomicBool,
}

impl CollectionTrigger {
    pub fn new(
        config: Arc<dyn ConfigSource>,
        scheduler: CollectionScheduler,
        work: Arc<dyn UnitOfWork>,
        health: Arc<HealthStatus>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            config,
            scheduler,
            work,
            health,
            tick_interval,
            missing_logged: AtomicBool::new(false),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            tick_secs = self.tick_interval.as_secs(),
            "Collection trigger started"
        );

        let mut reports = self.scheduler.subscribe();
        let mut tick = interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    self.tick_once().await;
                }
                report = reports.recv() => match report {
                    Ok(report) => self.health.apply(&report),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Run reports lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        tracing::info!("Collection trigger stopped");
    }

    /// Read the current configuration and tick the scheduler with it once.
    pub async fn tick_once(&self) -> Option<TickOutcome> {
        let _apply = self.scheduler.apply_guard().await;
        let config = match self.config.current_configuration().await {
            Ok(config) => {
                self.missing_logged.store(false, Ordering::Relaxed);
                config
            }
            Err(e) if e.is_not_found() => {
                if !self.missing_logged.swap(true, Ordering::Relaxed) {
                    tracing::info!("No configuration stored yet, collection idle");
                }
                return None;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read configuration");
                self.health.mark(AppStatus::Fatal, e.to_string());
                return None;
            }
        };

        match self.scheduler.tick(&config, self.work.clone()) {
            Ok(outcome) => {
                tracing::debug!(config_id = config.id, ?outcome, "Scheduler ticked");
                Some(outcome)
            }
            Err(e) => {
                tracing::error!(config_id = config.id, error = %e, "Scheduler rejected configuration");
                self.health.mark(AppStatus::Error, e.to_string());
                None
            }
        }
    }
}
