//! Bifrost error types

use std::time::Duration;

use reqwest::StatusCode;

/// Bifrost error types
#[derive(Debug, thiserror::Error)]
pub enum BifrostError {
    // Upstream outcomes
    /// Provider was reached but had no usable audio track.
    #[error("no usable audio track: {0}")]
    NotFound(String),

    /// Network failure, connect error or timeout.
    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    /// Explicit 429-class signal from the upstream.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Response arrived but did not have the expected shape.
    #[error("malformed upstream response: {0}")]
    Malformed(String),

    /// Every layer of the cascade failed.
    ///
    /// Carries no root cause; see the resolver statistics for
    /// diagnosis.
    #[error("all resolution layers exhausted")]
    Exhausted,

    // Local errors
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BifrostError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::TOO_MANY_REQUESTS => BifrostError::RateLimited { retry_after: None },
            StatusCode::NOT_FOUND => BifrostError::NotFound(format!("HTTP {status}")),
            _ => BifrostError::Unreachable(format!("HTTP {status}")),
        }
    }

    /// Whether this error should feed the rate limiter as an explicit
    /// rate-limit signal (longer initial backoff).
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, BifrostError::RateLimited { .. })
    }

    /// Server-requested delay carried by a `RateLimited` error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BifrostError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether a later attempt against the same upstream might succeed.
    ///
    /// `NotFound` and `Malformed` are properties of the content or the
    /// protocol, not of the moment.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BifrostError::Unreachable(_) | BifrostError::RateLimited { .. }
        )
    }
}

impl From<reqwest::Error> for BifrostError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BifrostError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            BifrostError::from_status(status)
        } else {
            BifrostError::Unreachable(err.to_string())
        }
    }
}

/// Result type alias for Bifrost operations
pub type Result<T> = std::result::Result<T, BifrostError>;
