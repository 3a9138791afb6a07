//! Text embedding boundary.
//!
//! [`EmbeddingProvider`] is the contract external models implement (see the
//! `recall-embed` crate for HTTP backends). Callers never use a provider
//! directly; they go through [`EmbeddingGateway`], which bounds concurrency,
//! retries transient failures, caches repeated texts and validates the
//! returned vector.

pub mod gateway;
pub mod retry;

pub use gateway::EmbeddingGateway;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::Embedding;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Classified provider failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    /// Provider error, connection failure or timeout. Retried.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider asked us to slow down. Retried, honouring the hint.
    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited {
        /// Provider-supplied wait before the next attempt.
        retry_after_ms: Option<u64>,
    },

    /// The provider rejected the text. Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl EmbeddingError {
    /// Whether another attempt could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidInput(_))
    }
}

/// Generate vector embeddings from text.
///
/// Implementations must be `Send + Sync`; the gateway shares one provider
/// across every in-flight request.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into `dimensions()` floats.
    ///
    /// # Errors
    ///
    /// A classified [`EmbeddingError`].
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    /// The dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// A human-readable name for the model (e.g. `"all-minilm"`).
    fn model_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Hashed bag-of-words provider (offline & tests)
// ---------------------------------------------------------------------------

/// Deterministic, model-free provider.
///
/// Each lower-cased alphanumeric token is hashed (FNV-1a) into one bucket
/// with a hash-derived sign; the vector is L2-normalised. Identical texts
/// give identical vectors and texts sharing words point the same way, which
/// is enough for tests and for running without a model server.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dims: usize,
}

impl HashEmbeddingProvider {
    /// Create a provider producing `dimensions`-long vectors.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions }
    }

    /// Synchronous core of [`EmbeddingProvider::embed`].
    ///
    /// # Errors
    ///
    /// [`EmbeddingError::InvalidInput`] when `text` has no alphanumeric
    /// token, or the provider was built with zero dimensions.
    pub fn embed_sync(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        if self.dims == 0 {
            return Err(EmbeddingError::InvalidInput("zero-dimensional provider".into()));
        }
        let mut values = vec![0.0_f32; self.dims];
        let mut tokens = 0_usize;
        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let hash = fnv1a(&token.to_lowercase());
            let bucket = (hash % self.dims as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            values[bucket] += sign;
            tokens += 1;
        }
        if tokens == 0 {
            return Err(EmbeddingError::InvalidInput("text contains no tokens".into()));
        }

        let mut embedding = Embedding(values);
        embedding.normalize();
        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.embed_sync(text)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "hashed-bag-of-words"
    }
}

fn fnv1a(text: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    text.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
