//! LLM-backed [`Summarizer`] over Ollama's `POST /api/generate`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use recall_core::config::NarrativeConfig;
use recall_core::narrative::{SKIP_MARKER, StreamEvent, SummarizeError, Summarizer};
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::EmbedError;
use crate::prompt::{HISTORY_PROMPT, MOMENT_PROMPT, render_template};
use crate::types::{GenerateRequest, GenerateResponse};

/// Summarizer that asks an Ollama model for each moment and history entry.
pub struct OllamaSummarizer {
    http: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaSummarizer {
    /// Create a summarizer.
    ///
    /// # Errors
    ///
    /// [`EmbedError::Config`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self, EmbedError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbedError::Config(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
            timeout,
        })
    }

    /// Build from the `[narrative]` section.
    ///
    /// # Errors
    ///
    /// See [`OllamaSummarizer::new`].
    pub fn from_config(config: &NarrativeConfig) -> Result<Self, EmbedError> {
        Self::new(
            config.base_url.clone(),
            config.model.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    /// One non-streaming generation.
    ///
    /// # Errors
    ///
    /// [`SummarizeError::Unavailable`] for transport trouble and non-success
    /// statuses, [`SummarizeError::BadResponse`] for an unreadable body.
    pub async fn generate(&self, prompt: &str) -> Result<String, SummarizeError> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let start = Instant::now();
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let resp = self.http.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                warn!(url = %url, timeout_ms = self.timeout.as_millis(), "Generation timed out");
            } else {
                warn!(url = %url, error = %e, "Generation request failed");
            }
            SummarizeError::Unavailable(e.to_string())
        })?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(url = %url, status = status.as_u16(), "Generation server returned an error");
            return Err(SummarizeError::Unavailable(format!("HTTP {}: {}", status.as_u16(), text.trim())));
        }
        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| SummarizeError::BadResponse(e.to_string()))?;

        debug!(
            model = %self.model,
            chars = parsed.response.len(),
            latency_ms = start.elapsed().as_millis(),
            "Generation received"
        );
        Ok(parsed.response)
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn summarize_moment(&self, events: &[StreamEvent]) -> Result<String, SummarizeError> {
        let lines: Vec<String> = events
            .iter()
            .map(|e| format!("- [{}] {}", e.label(), e.text))
            .collect();
        let events = lines.join("\n");
        let prompt = render_template(MOMENT_PROMPT, &[("events", events.as_str()), ("skip_marker", SKIP_MARKER)]);
        self.generate(&prompt).await
    }

    async fn summarize_history(&self, moments: &[String]) -> Result<String, SummarizeError> {
        let lines: Vec<String> = moments.iter().map(|m| format!("- {m}")).collect();
        let moments = lines.join("\n");
        let prompt = render_template(HISTORY_PROMPT, &[("moments", moments.as_str())]);
        self.generate(&prompt).await
    }

    fn name(&self) -> &str {
        &self.model
    }
}
