//! # recall-embed — Model Backends for Recall
//!
//! HTTP implementations of [`recall_core::EmbeddingProvider`]:
//!   - **Ollama** (local, the default for real deployments)
//!   - **OpenAI-compatible API** (OpenAI, vLLM, LM Studio, ...)
//!
//! and of [`recall_core::Summarizer`] over Ollama's generate endpoint, used
//! to condense stream events into the narrative log.
//!
//! Failures are classified for the core gateway's retry logic:
//!
//! ```text
//! HTTP 429                    → RateLimited { retry_after_ms }  (retried)
//! HTTP 5xx, timeout, connect  → Unavailable                     (retried)
//! other HTTP 4xx              → InvalidInput                    (not retried)
//! ```

pub mod client;
pub mod error;
pub mod prompt;
pub mod summarizer;
pub mod types;

use std::sync::Arc;

use recall_core::config::RecallConfig;
use recall_core::embedding::{EmbeddingProvider, HashEmbeddingProvider};
use recall_core::narrative::{ExtractiveSummarizer, Summarizer};
use tracing::info;

pub use client::{EmbeddingBackend, HttpEmbeddingProvider};
pub use error::EmbedError;
pub use summarizer::OllamaSummarizer;

/// Build the provider named by `embedding.provider`: `ollama`, `openai` or
/// `hash`.
///
/// # Errors
///
/// [`EmbedError::Config`] for an unknown provider name or an HTTP client
/// that cannot be built.
pub fn build_provider(config: &RecallConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbedError> {
    let dims = config.store.embedding_dimensions;
    let embedding = &config.embedding;
    let provider: Arc<dyn EmbeddingProvider> = match embedding.provider.to_ascii_lowercase().as_str() {
        "ollama" => Arc::new(HttpEmbeddingProvider::ollama(embedding, dims)?),
        "openai" => Arc::new(HttpEmbeddingProvider::openai(embedding, dims)?),
        "hash" => Arc::new(HashEmbeddingProvider::new(dims)),
        other => {
            return Err(EmbedError::Config(format!(
                "unknown embedding provider '{other}' (expected ollama, openai or hash)"
            )));
        }
    };
    info!(
        provider = %embedding.provider,
        model = provider.model_name(),
        dims,
        "Embedding provider ready"
    );
    Ok(provider)
}

/// Build the summarizer named by `narrative.summarizer`: `extractive` or
/// `ollama`.
///
/// # Errors
///
/// [`EmbedError::Config`] for an unknown summarizer name or an HTTP client
/// that cannot be built.
pub fn build_summarizer(config: &RecallConfig) -> Result<Arc<dyn Summarizer>, EmbedError> {
    let narrative = &config.narrative;
    let summarizer: Arc<dyn Summarizer> = match narrative.summarizer.to_ascii_lowercase().as_str() {
        "extractive" => Arc::new(ExtractiveSummarizer),
        "ollama" => Arc::new(OllamaSummarizer::from_config(narrative)?),
        other => {
            return Err(EmbedError::Config(format!(
                "unknown summarizer '{other}' (expected extractive or ollama)"
            )));
        }
    };
    info!(summarizer = summarizer.name(), "Narrative summarizer ready");
    Ok(summarizer)
}
