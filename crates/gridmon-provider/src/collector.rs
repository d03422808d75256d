use crate::error::{ProviderError, Result};
use crate::{ZoneData, ZoneProvider};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Fetches zone data for many zones at once with bounded concurrency.
pub struct ZoneDataCollector {
    provider: Arc<dyn ZoneProvider>,
    concurrency: usize,
    request_timeout: Duration,
}

impl ZoneDataCollector {
    pub fn new(provider: Arc<dyn ZoneProvider>, concurrency: usize) -> Self {
        Self {
            provider,
            concurrency: concurrency.max(1),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Upper bound for fetching one zone (both provider calls together).
    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Collect data for each distinct zone code.
    ///
    /// Zones still waiting for a permit or an answer when `cancel` fires are left out of
    /// the result. Every other zone maps to its own outcome; one failing zone never
    /// prevents the others from being fetched.
    pub async fn collect_all<I, S>(
        &self,
        zones: I,
        api_key: &str,
        cancel: &CancellationToken,
    ) -> BTreeMap<String, Result<ZoneData>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let zones: BTreeSet<String> = zones.into_iter().map(Into::into).collect();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = Vec::with_capacity(zones.len());

        for zone in zones {
            let sem = Arc::clone(&semaphore);
            let provider = Arc::clone(&self.provider);
            let api_key = api_key.to_string();
            let cancel = cancel.clone();
            let timeout_duration = self.request_timeout;

            tasks.push(tokio::spawn(async move {
                let fetch = async move {
                    let _permit = sem.acquire().await.ok()?;
                    let outcome =
                        match timeout(timeout_duration, provider.zone_data(&zone, &api_key)).await {
                            Ok(result) => result,
                            Err(_) => Err(ProviderError::Timeout {
                                provider: provider.name().to_string(),
                                zone: zone.clone(),
                            }),
                        };
                    Some((zone, outcome))
                };

                tokio::select! {
                    _ = cancel.cancelled() => None,
                    collected = fetch => collected,
                }
            }));
        }

        let mut results = BTreeMap::new();
        for task in tasks {
            match task.await {
                Ok(Some((zone, outcome))) => {
                    if let Err(e) = &outcome {
                        tracing::warn!(zone = %zone, error = %e, "Failed to collect zone data");
                    }
                    results.insert(zone, outcome);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Zone collection task panicked");
                }
            }
        }

        tracing::debug!(zones = results.len(), "Zone data collection finished");
        results
    }
}
