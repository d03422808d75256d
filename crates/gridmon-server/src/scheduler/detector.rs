use gridmon_common::types::Configuration;
use std::collections::HashMap;
use std::sync::Mutex;

/// Remembers the last configuration snapshot seen for each configuration id.
///
/// Entries live for the whole process and are never removed.
#[derive(Default)]
pub struct ConfigChangeDetector {
    previous: Mutex<HashMap<i64, Configuration>>,
}

impl ConfigChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `config` and report whether it is new or differs from the stored snapshot.
    pub fn observe(&self, config: &Configuration) -> bool {
        let mut previous = self
            .previous
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match previous.get(&config.id) {
            Some(old) if old == config => false,
            Some(_) => {
                tracing::debug!(config_id = config.id, "Configuration changed");
                previous.insert(config.id, config.clone());
                true
            }
            None => {
                tracing::debug!(config_id = config.id, "Configuration added");
                previous.insert(config.id, config.clone());
                true
            }
        }
    }

    /// Latest snapshot recorded for `id`.
    pub fn current(&self, id: i64) -> Option<Configuration> {
        self.previous
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned()
    }
}
