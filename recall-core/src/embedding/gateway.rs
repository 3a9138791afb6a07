//! The gateway every embedding request goes through.
//!
//! Per request:
//!
//! 1. Return a cached vector if the exact text was embedded recently.
//! 2. Wait (bounded) for one of `max_concurrent` provider slots; give up
//!    with [`RecallError::Overloaded`] after `acquire_timeout`.
//! 3. Call the provider, retrying transient failures per [`RetryPolicy`].
//!    The slot is held across retries so backoff counts against the limit.
//! 4. Validate the vector (dimensionality, finiteness) and cache it.
//!
//! Dropping the returned future at any point releases the slot.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::embedding::retry::RetryPolicy;
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::error::{RecallError, Result};
use crate::metrics::RecallCounters;
use crate::types::Embedding;

/// Bounded, retrying, caching front for an [`EmbeddingProvider`].
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    dims: usize,
    permits: Semaphore,
    acquire_timeout: Duration,
    retry: RetryPolicy,
    cache: Option<Mutex<LruCache<String, Arc<Embedding>>>>,
    counters: Arc<RecallCounters>,
}

impl EmbeddingGateway {
    /// Wrap `provider`, expecting vectors of length `dimensions`.
    #[must_use]
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        dimensions: usize,
        config: &EmbeddingConfig,
        counters: Arc<RecallCounters>,
    ) -> Self {
        Self {
            provider,
            dims: dimensions,
            permits: Semaphore::new(config.max_concurrent.max(1)),
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            retry: RetryPolicy::from_config(&config.retry),
            cache: NonZeroUsize::new(config.cache_capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            counters,
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Name of the wrapped model.
    #[must_use]
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Free provider slots right now.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Embed `text`.
    ///
    /// # Errors
    ///
    /// - [`RecallError::Overloaded`] if no slot frees up in time.
    /// - [`RecallError::EmbeddingUnavailable`] / [`RecallError::EmbeddingRateLimited`]
    ///   once retries are exhausted.
    /// - [`RecallError::EmbeddingInvalidInput`] straight away for rejected text.
    /// - [`RecallError::DimensionMismatch`] / [`RecallError::InvalidEmbedding`]
    ///   for a malformed vector.
    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        if let Some(hit) = self.cached(text) {
            RecallCounters::incr(&self.counters.cache_hits);
            return Ok(hit.as_ref().clone());
        }

        let _permit = match tokio::time::timeout(self.acquire_timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                RecallCounters::incr(&self.counters.overloaded);
                let waited_ms = u64::try_from(self.acquire_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(waited_ms, "No embedding slot available");
                return Err(RecallError::Overloaded { waited_ms });
            }
        };

        let embedding = self.call_with_retry(text).await?;
        self.validate(&embedding)?;

        if let Some(cache) = &self.cache {
            cache.lock().put(text.to_string(), Arc::new(embedding.clone()));
        }
        Ok(embedding)
    }

    fn cached(&self, text: &str) -> Option<Arc<Embedding>> {
        self.cache.as_ref()?.lock().get(text).cloned()
    }

    async fn call_with_retry(&self, text: &str) -> Result<Embedding> {
        let mut attempt = 1;
        loop {
            RecallCounters::incr(&self.counters.embedding_calls);
            let err = match self.provider.embed(text).await {
                Ok(embedding) => return Ok(embedding),
                Err(err) => err,
            };

            if !err.is_transient() || attempt >= self.retry.max_attempts {
                RecallCounters::incr(&self.counters.embedding_failures);
                warn!(attempts = attempt, error = %err, model = self.provider.model_name(), "Embedding failed");
                return Err(into_recall_error(err, attempt));
            }

            let hint = match &err {
                EmbeddingError::RateLimited { retry_after_ms } => *retry_after_ms,
                _ => None,
            };
            let delay = self.retry.delay_for(attempt, hint);
            warn!(
                attempt,
                max_attempts = self.retry.max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Retrying embedding request"
            );
            RecallCounters::incr(&self.counters.embedding_retries);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn validate(&self, embedding: &Embedding) -> Result<()> {
        if embedding.dimensions() != self.dims {
            return Err(RecallError::DimensionMismatch {
                expected: self.dims,
                actual: embedding.dimensions(),
            });
        }
        if !embedding.is_finite() {
            return Err(RecallError::InvalidEmbedding(
                "provider returned non-finite values".into(),
            ));
        }
        debug!(dims = self.dims, "Embedding validated");
        Ok(())
    }
}

fn into_recall_error(err: EmbeddingError, attempts: u32) -> RecallError {
    match err {
        EmbeddingError::Unavailable(message) => RecallError::EmbeddingUnavailable { attempts, message },
        EmbeddingError::RateLimited { .. } => RecallError::EmbeddingRateLimited { attempts },
        EmbeddingError::InvalidInput(message) => RecallError::EmbeddingInvalidInput(message),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
