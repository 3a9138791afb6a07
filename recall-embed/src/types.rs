//! Wire types for the supported embedding and generation APIs.

use serde::{Deserialize, Serialize};

/// Body of Ollama's `POST /api/embeddings`.
#[derive(Debug, Clone, Serialize)]
pub struct OllamaRequest<'a> {
    /// Model name, e.g. `all-minilm`.
    pub model: &'a str,
    /// Text to embed.
    pub prompt: &'a str,
}

/// Ollama's embedding response.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaResponse {
    /// The vector.
    pub embedding: Vec<f32>,
}

/// Body of an OpenAI-compatible `POST /v1/embeddings`.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiRequest<'a> {
    /// Model name, e.g. `text-embedding-3-small`.
    pub model: &'a str,
    /// Text to embed.
    pub input: &'a str,
}

/// OpenAI-compatible embedding response.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiResponse {
    /// One entry per input.
    pub data: Vec<OpenAiEmbedding>,
}

/// One embedding inside [`OpenAiResponse`].
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiEmbedding {
    /// The vector.
    pub embedding: Vec<f32>,
    /// Position of the matching input.
    #[serde(default)]
    pub index: usize,
}

/// Body of Ollama's `POST /api/generate`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest<'a> {
    /// Model name, e.g. `llama3.2:latest`.
    pub model: &'a str,
    /// Full prompt.
    pub prompt: &'a str,
    /// Always `false`: one JSON reply, not a token stream.
    pub stream: bool,
}

/// Ollama's non-streaming generation reply.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    /// Generated text.
    pub response: String,
}
