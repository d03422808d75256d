//! Per-configuration collection runs.
//!
//! Every configuration id owns at most one driver task. The driver spawns the unit of work
//! on its own task, waits for it or for a change signal, reports the outcome and then
//! either waits out the refresh interval or stops. A change signal cancels the current
//! attempt and starts the next one with the latest configuration snapshot, bumping the
//! generation so that anything the superseded attempt produces later is ignored.

mod detector;
mod signal;

pub use detector::ConfigChangeDetector;
pub use signal::ChangeSignal;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridmon_common::types::{Configuration, ConfigurationError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

/// Work performed by one collection run.
///
/// Implementations should stop promptly once `cancel` fires; cancellation is advisory.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn run(&self, cancel: CancellationToken, config: Configuration) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid configuration {id}: {source}")]
    InvalidConfig {
        id: i64,
        #[source]
        source: ConfigurationError,
    },

    #[error("scheduler is shut down")]
    ShutDown,
}

/// What a single `tick` decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The configuration is disabled; any run was cancelled.
    Disabled,
    /// A new run was started.
    Started { generation: u64 },
    /// A run is live and has been signalled to restart with the latest configuration.
    Restarting,
    /// A run is live and nothing changed.
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed(String),
    /// Superseded by a newer generation or stopped.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub config_id: i64,
    pub generation: u64,
    pub outcome: RunOutcome,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    /// The unit of work is executing.
    Running,
    /// The last attempt succeeded; waiting for the refresh interval or a change.
    Waiting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RunSnapshot {
    pub config_id: i64,
    pub generation: u64,
    pub started_at: DateTime<Utc>,
    pub phase: RunPhase,
}

struct LiveRun {
    driver_id: u64,
    generation: u64,
    started_at: DateTime<Utc>,
    phase: RunPhase,
    cancel: CancellationToken,
    signal: ChangeSignal,
    driver: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct RunEntry {
    active: bool,
    generation: u64,
    live: Option<LiveRun>,
    /// Driver of a cancelled run that may still be winding down.
    retiring: Option<JoinHandle<()>>,
}

struct Inner {
    detector: Arc<ConfigChangeDetector>,
    runs: Mutex<HashMap<i64, RunEntry>>,
    reports: broadcast::Sender<RunReport>,
    cancel_grace: Duration,
    root: CancellationToken,
    next_driver: AtomicU64,
    /// Held by callers across "read stored configuration, then tick".
    apply: tokio::sync::Mutex<()>,
}

impl Inner {
    fn lock_runs(&self) -> MutexGuard<'_, HashMap<i64, RunEntry>> {
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_current(&self, config_id: i64, driver_id: u64, generation: u64) -> bool {
        self.lock_runs()
            .get(&config_id)
            .and_then(|entry| entry.live.as_ref())
            .is_some_and(|live| live.driver_id == driver_id && live.generation == generation)
    }

    fn set_phase(&self, config_id: i64, driver_id: u64, phase: RunPhase) {
        let mut runs = self.lock_runs();
        if let Some(live) = runs
            .get_mut(&config_id)
            .and_then(|entry| entry.live.as_mut())
            .filter(|live| live.driver_id == driver_id)
        {
            live.phase = phase;
        }
    }

    fn finish(&self, config_id: i64, driver_id: u64) {
        let mut runs = self.lock_runs();
        if let Some(entry) = runs.get_mut(&config_id) {
            if entry
                .live
                .as_ref()
                .is_some_and(|live| live.driver_id == driver_id)
            {
                entry.live = None;
            }
        }
    }
}

/// Owns one collection run per configuration id.
#[derive(Clone)]
pub struct CollectionScheduler {
    inner: Arc<Inner>,
}

impl CollectionScheduler {
    /// `cancel_grace` bounds how long a superseded attempt is awaited before its
    /// successor starts.
    pub fn new(detector: Arc<ConfigChangeDetector>, cancel_grace: Duration) -> Self {
        let (reports, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                detector,
                runs: Mutex::new(HashMap::new()),
                reports,
                cancel_grace,
                root: CancellationToken::new(),
                next_driver: AtomicU64::new(1),
                apply: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn detector(&self) -> &Arc<ConfigChangeDetector> {
        &self.inner.detector
    }

    /// Serializes callers that read a configuration from the store and then tick with it,
    /// so an older snapshot can never be ticked after a newer one.
    pub async fn apply_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.apply.lock().await
    }

    /// Reports of every non-stale run completion.
    pub fn subscribe(&self) -> broadcast::Receiver<RunReport> {
        self.inner.reports.subscribe()
    }

    /// Decide what to do with the current snapshot of `config`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] when an enabled snapshot fails validation and
    /// [`SchedulerError::ShutDown`] after [`shutdown`](Self::shutdown).
    pub fn tick(
        &self,
        config: &Configuration,
        work: Arc<dyn UnitOfWork>,
    ) -> Result<TickOutcome, SchedulerError> {
        if self.inner.root.is_cancelled() {
            return Err(SchedulerError::ShutDown);
        }
        let mut runs = self.inner.lock_runs();

        // Disabling never needs a valid snapshot.
        if !config.enabled {
            let entry = runs.entry(config.id).or_default();
            if let Some(mut live) = entry.live.take() {
                tracing::info!(
                    config_id = config.id,
                    generation = live.generation,
                    "Configuration disabled, cancelling collection run"
                );
                live.cancel.cancel();
                entry.retiring = live.driver.take();
            }
            entry.active = false;
            return Ok(TickOutcome::Disabled);
        }

        config
            .validate()
            .map_err(|source| SchedulerError::InvalidConfig {
                id: config.id,
                source,
            })?;
        let entry = runs.entry(config.id).or_default();

        let activated = !std::mem::replace(&mut entry.active, true);
        let changed = self.inner.detector.observe(config);

        if let Some(live) = &entry.live {
            if activated || changed {
                live.signal.notify();
                return Ok(TickOutcome::Restarting);
            }
            return Ok(TickOutcome::AlreadyRunning);
        }

        entry.generation += 1;
        let generation = entry.generation;
        let driver_id = self.inner.next_driver.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.root.child_token();
        let (signal, signal_rx) = ChangeSignal::channel();

        let driver = Driver {
            inner: Arc::clone(&self.inner),
            config_id: config.id,
            driver_id,
            generation,
            config: config.clone(),
            work,
            cancel: cancel.clone(),
            signal_rx,
            previous: entry.retiring.take(),
        };
        let handle = tokio::spawn(driver.run());

        entry.live = Some(LiveRun {
            driver_id,
            generation,
            started_at: Utc::now(),
            phase: RunPhase::Running,
            cancel,
            signal,
            driver: Some(handle),
        });

        Ok(TickOutcome::Started { generation })
    }

    /// Ask the live run of `config_id`, if any, to restart. Returns whether a signal
    /// was queued.
    pub fn notify_change(&self, config_id: i64) -> bool {
        self.inner
            .lock_runs()
            .get(&config_id)
            .and_then(|entry| entry.live.as_ref())
            .is_some_and(|live| live.signal.notify())
    }

    /// Ask every live run to restart, e.g. after the asset set changed.
    pub fn notify_all(&self) -> usize {
        self.inner
            .lock_runs()
            .values()
            .filter_map(|entry| entry.live.as_ref())
            .filter(|live| live.signal.notify())
            .count()
    }

    pub fn run_state(&self, config_id: i64) -> Option<RunSnapshot> {
        self.inner
            .lock_runs()
            .get(&config_id)
            .and_then(|entry| entry.live.as_ref())
            .map(|live| RunSnapshot {
                config_id,
                generation: live.generation,
                started_at: live.started_at,
                phase: live.phase,
            })
    }

    /// Cancel every run and wait (bounded by the grace period) for the drivers to stop.
    pub async fn shutdown(&self) {
        self.inner.root.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut runs = self.inner.lock_runs();
            runs.values_mut()
                .flat_map(|entry| {
                    let live = entry.live.take().and_then(|mut live| live.driver.take());
                    [live, entry.retiring.take()]
                })
                .flatten()
                .collect()
        };

        tracing::info!(runs = handles.len(), "Stopping collection runs");
        for handle in handles {
            if tokio::time::timeout(self.inner.cancel_grace, handle)
                .await
                .is_err()
            {
                tracing::warn!("Collection run did not stop within the grace period");
            }
        }
    }
}

enum Next {
    Restart,
    Stop,
}

struct Driver {
    inner: Arc<Inner>,
    config_id: i64,
    driver_id: u64,
    generation: u64,
    config: Configuration,
    work: Arc<dyn UnitOfWork>,
    cancel: CancellationToken,
    signal_rx: mpsc::Receiver<()>,
    previous: Option<JoinHandle<()>>,
}

impl Driver {
    async fn run(mut self) {
        if let Some(previous) = self.previous.take() {
            if tokio::time::timeout(self.inner.cancel_grace, previous)
                .await
                .is_err()
            {
                tracing::warn!(
                    config_id = self.config_id,
                    "Previous collection run still winding down"
                );
            }
        }

        loop {
            match self.attempt().await {
                Next::Restart => {
                    if !self.advance() {
                        return;
                    }
                }
                Next::Stop => {
                    self.inner.finish(self.config_id, self.driver_id);
                    return;
                }
            }
        }
    }

    async fn attempt(&mut self) -> Next {
        let token = self.cancel.child_token();
        let mut task = tokio::spawn({
            let work = Arc::clone(&self.work);
            let config = self.config.clone();
            let token = token.clone();
            async move { work.run(token, config).await }
        });

        tracing::info!(
            config_id = self.config_id,
            generation = self.generation,
            "Collecting started"
        );

        tokio::select! {
            joined = &mut task => {
                let outcome = match joined {
                    _ if token.is_cancelled() => RunOutcome::Cancelled,
                    Ok(Ok(())) => RunOutcome::Succeeded,
                    Ok(Err(e)) => RunOutcome::Failed(format!("{e:#}")),
                    Err(e) => RunOutcome::Failed(format!("collection task aborted: {e}")),
                };
                let succeeded = outcome == RunOutcome::Succeeded;
                if !self.report(outcome) || !succeeded {
                    return Next::Stop;
                }
                self.wait_for_next().await
            }
            Some(()) = self.signal_rx.recv() => {
                tracing::info!(
                    config_id = self.config_id,
                    generation = self.generation,
                    "Configuration changed, restarting collection run"
                );
                token.cancel();
                self.await_superseded(task).await;
                self.report(RunOutcome::Cancelled);
                Next::Restart
            }
            _ = self.cancel.cancelled() => {
                self.await_superseded(task).await;
                self.report(RunOutcome::Cancelled);
                Next::Stop
            }
        }
    }

    async fn wait_for_next(&mut self) -> Next {
        self.inner
            .set_phase(self.config_id, self.driver_id, RunPhase::Waiting);

        tokio::select! {
            _ = tokio::time::sleep(self.config.refresh_interval()) => Next::Stop,
            Some(()) = self.signal_rx.recv() => {
                tracing::info!(
                    config_id = self.config_id,
                    "Configuration changed while waiting, collecting now"
                );
                Next::Restart
            }
            _ = self.cancel.cancelled() => Next::Stop,
        }
    }

    async fn await_superseded(&self, task: JoinHandle<anyhow::Result<()>>) {
        if tokio::time::timeout(self.inner.cancel_grace, task)
            .await
            .is_err()
        {
            tracing::warn!(
                config_id = self.config_id,
                generation = self.generation,
                grace_ms = self.inner.cancel_grace.as_millis() as u64,
                "Superseded collection run ignored cancellation, detaching it"
            );
        }
    }

    /// Publish the outcome of the current generation. Returns `false` for stale results.
    fn report(&self, outcome: RunOutcome) -> bool {
        if !self
            .inner
            .is_current(self.config_id, self.driver_id, self.generation)
        {
            tracing::debug!(
                config_id = self.config_id,
                generation = self.generation,
                "Discarding stale collection result"
            );
            return false;
        }

        match &outcome {
            RunOutcome::Succeeded => tracing::info!(
                config_id = self.config_id,
                generation = self.generation,
                "Collecting finished"
            ),
            RunOutcome::Failed(error) => tracing::error!(
                config_id = self.config_id,
                generation = self.generation,
                error = %error,
                "Collecting failed"
            ),
            RunOutcome::Cancelled => tracing::debug!(
                config_id = self.config_id,
                generation = self.generation,
                "Collecting cancelled"
            ),
        }

        let _ = self.inner.reports.send(RunReport {
            config_id: self.config_id,
            generation: self.generation,
            outcome,
            finished_at: Utc::now(),
        });
        true
    }

    /// Move to the next generation with the latest known configuration.
    fn advance(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        // The restart below picks up every change signalled so far.
        while self.signal_rx.try_recv().is_ok() {}

        let mut runs = self.inner.lock_runs();
        let Some(entry) = runs.get_mut(&self.config_id) else {
            return false;
        };
        let Some(live) = entry
            .live
            .as_mut()
            .filter(|live| live.driver_id == self.driver_id)
        else {
            return false;
        };

        entry.generation += 1;
        live.generation = entry.generation;
        live.started_at = Utc::now();
        live.phase = RunPhase::Running;
        self.generation = live.generation;

        if let Some(config) = self.inner.detector.current(self.config_id) {
            self.config = config;
        }
        true
    }
}
