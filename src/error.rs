use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Failure taxonomy for everything that crosses the provider boundary.
/// Callers match on the variant to pick a recovery path; the message is for logs only.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Connection reset, 5xx, or anything else worth trying again.
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// Provider answered, but the payload envelope could not be mapped.
    #[error("malformed provider data: {0}")]
    DataQuality(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{provider} does not support {operation}")]
    Unsupported { provider: String, operation: &'static str },

    #[error("circuit '{0}' is open")]
    CircuitOpen(String),

    #[error("all {attempts} provider(s) failed for chain '{chain}': {last}")]
    AllProvidersFailed {
        chain: String,
        attempts: usize,
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Worth another attempt against the same provider.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Transient(_) | FetchError::RateLimited(_) | FetchError::Timeout(_)
        )
    }

    /// Counts against the provider's circuit breaker.
    pub fn is_provider_fault(&self) -> bool {
        matches!(
            self,
            FetchError::Transient(_)
                | FetchError::RateLimited(_)
                | FetchError::Timeout(_)
                | FetchError::DataQuality(_)
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return FetchError::Timeout(0);
        }
        if let Some(status) = e.status() {
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return FetchError::RateLimited(e.to_string());
            }
            if status == reqwest::StatusCode::NOT_FOUND {
                return FetchError::NotFound(e.to_string());
            }
        }
        if e.is_decode() {
            return FetchError::DataQuality(e.to_string());
        }
        FetchError::Transient(e.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::DataQuality(e.to_string())
    }
}
