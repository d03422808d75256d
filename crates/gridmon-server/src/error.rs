use crate::store::StoreError;
use gridmon_provider::ProviderError;

/// Failure of one collection run.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("loading assets: {0}")]
    Store(#[from] StoreError),

    /// First zone that could not be fetched; readings for other zones were still written.
    #[error("collecting zone {zone} failed ({failed} zone(s) in total): {message}")]
    Provider {
        zone: String,
        status: Option<u16>,
        message: String,
        failed: usize,
    },

    /// The fetch of `zone` ended without any result, e.g. its task panicked.
    #[error("no result for zone {zone} ({failed} zone(s) failed in total)")]
    MissingResult { zone: String, failed: usize },

    #[error("collection cancelled")]
    Cancelled,
}

impl CollectError {
    pub(crate) fn from_provider(zone: &str, err: &ProviderError, failed: usize) -> Self {
        CollectError::Provider {
            zone: zone.to_string(),
            status: err.status(),
            message: err.to_string(),
            failed,
        }
    }
}

/// Failure to bind an asset to a zone.
#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("location name must not be empty")]
    EmptyName,

    /// `available` lists every zone as `Name(CODE)`.
    #[error("Location not found. Available: {available}")]
    NotFound { name: String, available: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
