/// Errors that can occur when talking to the zone data provider.
///
/// # Examples
///
/// ```rust
/// use gridmon_provider::error::ProviderError;
///
/// let err = ProviderError::HttpError {
///     provider: "electricitymaps".to_string(),
///     status: 503,
///     body: "upstream unavailable".to_string(),
/// };
/// assert!(err.to_string().contains("503"));
/// assert_eq!(err.status(), Some(503));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Non-2xx status code whose body carried no usable error message.
    #[error("{provider} API HTTP error: status={status}, body={body}")]
    HttpError {
        provider: String,
        status: u16,
        body: String,
    },

    /// Non-2xx status code with an `{"error": "..."}` body.
    #[error("{provider} API error: status={status}, message={message}")]
    ApiError {
        provider: String,
        status: u16,
        message: String,
    },

    /// A zone request exceeded the configured request timeout.
    #[error("{provider} request for zone {zone} timed out")]
    Timeout { provider: String, zone: String },

    /// An underlying HTTP transport error from `reqwest`.
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// JSON serialization or deserialization failure.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Client configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProviderError {
    /// HTTP status carried by the error, when the provider answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::HttpError { status, .. } | ProviderError::ApiError { status, .. } => {
                Some(*status)
            }
            ProviderError::NetworkError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Convenience type alias so callers can write `error::Result<T>`.
pub type Result<T> = std::result::Result<T, ProviderError>;
