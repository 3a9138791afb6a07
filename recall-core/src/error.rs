//! Error types for the recall core library.

use thiserror::Error;

/// Top-level error type for all recall operations.
#[derive(Error, Debug)]
pub enum RecallError {
    /// An embedding's length disagrees with the store's fixed dimensionality.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality configured for the store.
        expected: usize,
        /// Dimensionality of the rejected vector.
        actual: usize,
    },

    /// `base_importance` fell outside the configured bound (or was NaN).
    #[error("Invalid importance {value}: must lie within [{min}, {max}]")]
    InvalidImportance {
        /// The rejected value.
        value: f32,
        /// Lower bound (inclusive).
        min: f32,
        /// Upper bound (inclusive).
        max: f32,
    },

    /// An embedding contained NaN or infinite components.
    #[error("Invalid embedding: {0}")]
    InvalidEmbedding(String),

    /// Content validation rejected the input before embedding.
    #[error("Content rejected: {reason}")]
    ContentRejected {
        /// Why the content was rejected.
        reason: String,
    },

    /// The embedding provider failed or timed out (after retries).
    #[error("Embedding provider unavailable after {attempts} attempt(s): {message}")]
    EmbeddingUnavailable {
        /// How many attempts were made.
        attempts: u32,
        /// Last provider error.
        message: String,
    },

    /// The embedding provider kept throttling us (after retries).
    #[error("Embedding provider rate limited after {attempts} attempt(s)")]
    EmbeddingRateLimited {
        /// How many attempts were made.
        attempts: u32,
    },

    /// The provider rejected the text itself; never retried.
    #[error("Embedding provider rejected input: {0}")]
    EmbeddingInvalidInput(String),

    /// The embedding concurrency limit stayed saturated past the wait timeout.
    #[error("Overloaded: no embedding slot became free within {waited_ms}ms")]
    Overloaded {
        /// How long the request waited for a slot.
        waited_ms: u64,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite snapshot error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecallError {
    /// Stable snake_case name of the error kind, used on the wire.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::InvalidImportance { .. } => "invalid_importance",
            Self::InvalidEmbedding(_) => "invalid_embedding",
            Self::ContentRejected { .. } => "content_rejected",
            Self::EmbeddingUnavailable { .. } => "embedding_unavailable",
            Self::EmbeddingRateLimited { .. } => "embedding_rate_limited",
            Self::EmbeddingInvalidInput(_) => "embedding_invalid_input",
            Self::Overloaded { .. } => "overloaded",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
            Self::Database(_) => "database",
            Self::Io(_) => "io",
        }
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, RecallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_wire_names() {
        let err = RecallError::DimensionMismatch { expected: 4, actual: 3 };
        assert_eq!(err.kind(), "dimension_mismatch");
        assert_eq!(RecallError::Overloaded { waited_ms: 10 }.kind(), "overloaded");
        assert_eq!(
            RecallError::EmbeddingRateLimited { attempts: 3 }.kind(),
            "embedding_rate_limited"
        );
    }

    #[test]
    fn messages_carry_context() {
        let err = RecallError::InvalidImportance { value: 1.5, min: 0.0, max: 1.0 };
        assert_eq!(err.to_string(), "Invalid importance 1.5: must lie within [0, 1]");
    }
}
