//! HTTP embedding client for Ollama and OpenAI-compatible backends.
//!
//! Each call is a single attempt with a request timeout. Retries, backoff
//! and concurrency limits belong to `recall_core::EmbeddingGateway`, which
//! wraps this provider.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use recall_core::config::EmbeddingConfig;
use recall_core::embedding::{EmbeddingError, EmbeddingProvider};
use recall_core::types::Embedding;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use tracing::{debug, warn};

use crate::error::{EmbedError, parse_retry_after};
use crate::types::{OllamaRequest, OllamaResponse, OpenAiRequest, OpenAiResponse};

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Which API the provider speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// Ollama (`POST {base_url}/api/embeddings`).
    Ollama {
        /// Server root, e.g. `http://localhost:11434`.
        base_url: String,
    },
    /// OpenAI-compatible API (`POST {base_url}/v1/embeddings`).
    OpenAiCompatible {
        /// Server root, e.g. `https://api.openai.com`.
        base_url: String,
        /// Bearer token, if the server wants one.
        api_key: Option<String>,
    },
}

impl EmbeddingBackend {
    fn endpoint(&self) -> String {
        match self {
            Self::Ollama { base_url } => format!("{}/api/embeddings", base_url.trim_end_matches('/')),
            Self::OpenAiCompatible { base_url, .. } => {
                format!("{}/v1/embeddings", base_url.trim_end_matches('/'))
            }
        }
    }
}

/// [`EmbeddingProvider`] backed by an HTTP embedding server.
pub struct HttpEmbeddingProvider {
    backend: EmbeddingBackend,
    http: Client,
    model: String,
    dims: usize,
    timeout: Duration,
}

impl HttpEmbeddingProvider {
    /// Create a provider.
    ///
    /// # Errors
    ///
    /// [`EmbedError::Config`] if the HTTP client cannot be built.
    pub fn new(
        backend: EmbeddingBackend,
        model: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, EmbedError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbedError::Config(e.to_string()))?;
        Ok(Self {
            backend,
            http,
            model: model.into(),
            dims: dimensions,
            timeout,
        })
    }

    /// Build an Ollama provider from the `[embedding]` section.
    ///
    /// # Errors
    ///
    /// See [`HttpEmbeddingProvider::new`].
    pub fn ollama(config: &EmbeddingConfig, dimensions: usize) -> Result<Self, EmbedError> {
        Self::new(
            EmbeddingBackend::Ollama {
                base_url: config.base_url.clone(),
            },
            config.model.clone(),
            dimensions,
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    /// Build an OpenAI-compatible provider from the `[embedding]` section.
    ///
    /// # Errors
    ///
    /// See [`HttpEmbeddingProvider::new`].
    pub fn openai(config: &EmbeddingConfig, dimensions: usize) -> Result<Self, EmbedError> {
        Self::new(
            EmbeddingBackend::OpenAiCompatible {
                base_url: config.base_url.clone(),
                api_key: config.api_key.clone(),
            },
            config.model.clone(),
            dimensions,
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    /// The backend this provider talks to.
    #[must_use]
    pub fn backend(&self) -> &EmbeddingBackend {
        &self.backend
    }

    /// One embedding request, no retries.
    ///
    /// # Errors
    ///
    /// Any [`EmbedError`]; classify with `EmbeddingError::from`.
    pub async fn request(&self, text: &str) -> Result<Embedding, EmbedError> {
        let url = self.backend.endpoint();
        let start = Instant::now();

        let sent = match &self.backend {
            EmbeddingBackend::Ollama { .. } => {
                self.http
                    .post(&url)
                    .json(&OllamaRequest {
                        model: &self.model,
                        prompt: text,
                    })
                    .send()
                    .await
            }
            EmbeddingBackend::OpenAiCompatible { api_key, .. } => {
                let mut req = self.http.post(&url).json(&OpenAiRequest {
                    model: &self.model,
                    input: text,
                });
                if let Some(key) = api_key {
                    req = req.bearer_auth(key);
                }
                req.send().await
            }
        };

        let resp = sent.map_err(|e| self.classify(&url, e))?;
        let resp = check_status(resp).await?;

        let values = match &self.backend {
            EmbeddingBackend::Ollama { .. } => {
                resp.json::<OllamaResponse>()
                    .await
                    .map_err(|e| self.classify(&url, e))?
                    .embedding
            }
            EmbeddingBackend::OpenAiCompatible { .. } => {
                let mut parsed = resp
                    .json::<OpenAiResponse>()
                    .await
                    .map_err(|e| self.classify(&url, e))?;
                if parsed.data.is_empty() {
                    return Err(EmbedError::Parse("response contained no embeddings".into()));
                }
                parsed.data.swap_remove(0).embedding
            }
        };

        debug!(
            model = %self.model,
            dims = values.len(),
            latency_ms = start.elapsed().as_millis(),
            "Embedding received"
        );
        Ok(Embedding(values))
    }

    /// Map a client failure, reporting the configured limit on timeouts.
    /// The limit covers the whole exchange, body included.
    fn classify(&self, url: &str, err: reqwest::Error) -> EmbedError {
        if err.is_timeout() {
            let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(url = %url, timeout_ms, "Embedding request timed out");
            EmbedError::Timeout(timeout_ms)
        } else {
            warn!(url = %url, error = %err, "Embedding request failed");
            err.into()
        }
    }
}

/// Turn a non-success response into [`EmbedError::Http`].
async fn check_status(resp: Response) -> Result<Response, EmbedError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after_ms = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let mut body = resp.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY).rev().find(|&i| body.is_char_boundary(i)).unwrap_or(0);
        body.truncate(cut);
    }
    warn!(status = status.as_u16(), retry_after_ms, "Embedding server returned error");
    Err(EmbedError::Http {
        status: status.as_u16(),
        body,
        retry_after_ms,
    })
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.request(text).await.map_err(EmbeddingError::from)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
