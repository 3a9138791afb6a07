//! Embedding backend error types.

use std::time::Duration;

use recall_core::embedding::EmbeddingError;
use thiserror::Error;

/// Errors that can occur while talking to an embedding backend.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The backend answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body (truncated).
        body: String,
        /// Parsed `Retry-After`, if the backend sent one.
        retry_after_ms: Option<u64>,
    },

    /// Request timed out.
    #[error("embedding request timed out after {0}ms")]
    Timeout(u64),

    /// Connection or other transport failure.
    #[error("embedding request failed: {0}")]
    Transport(String),

    /// The response body was not the expected JSON.
    #[error("failed to parse embedding response: {0}")]
    Parse(String),

    /// Bad provider configuration.
    #[error("embedding configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for EmbedError {
    /// Timeouts land in `Transport` here because the configured limit is not
    /// known at this point; the provider reports [`EmbedError::Timeout`]
    /// itself.
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EmbedError::Parse(err.to_string())
        } else {
            EmbedError::Transport(err.to_string())
        }
    }
}

impl From<EmbedError> for EmbeddingError {
    /// 429 is throttling, 5xx and transport trouble are outages, any other
    /// 4xx means the text itself was refused.
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::Http {
                status: 429,
                retry_after_ms,
                ..
            } => EmbeddingError::RateLimited { retry_after_ms },
            EmbedError::Http { status, .. } if (400..500).contains(&status) && status != 408 => {
                EmbeddingError::InvalidInput(err.to_string())
            }
            EmbedError::Config(msg) => EmbeddingError::InvalidInput(msg),
            other => EmbeddingError::Unavailable(other.to_string()),
        }
    }
}

/// Parse a `Retry-After` header given in (possibly fractional) seconds.
///
/// HTTP-date values are not supported and yield `None`.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<u64> {
    let secs: f64 = value.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let delay = Duration::try_from_secs_f64(secs).ok()?;
    u64::try_from(delay.as_millis()).ok()
}
