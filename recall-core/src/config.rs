//! Configuration for the recall engine.
//!
//! Maps directly to `recall.toml`. Every section is optional and falls back
//! to its `Default`.

use serde::{Deserialize, Serialize};

use crate::error::{RecallError, Result};
use crate::types::ImportanceBounds;

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecallConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Record store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Recency decay and reinforcement.
    #[serde(default)]
    pub decay: DecayConfig,
    /// Ranking settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Optional eviction policy.
    #[serde(default)]
    pub eviction: EvictionConfig,
    /// Embedding provider and gateway settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Snapshot persistence.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Narrative log and its summarizer.
    #[serde(default)]
    pub narrative: NarrativeConfig,
}

impl RecallConfig {
    /// Load configuration from a TOML string and validate it.
    ///
    /// # Errors
    /// Returns `RecallError::Config` if the TOML is invalid or a value is out
    /// of range.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| RecallError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    /// Returns `RecallError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| -> Result<()> { Err(RecallError::Config(msg.to_string())) };

        if self.store.embedding_dimensions == 0 {
            return fail("store.embedding_dimensions must be > 0");
        }
        if !(self.store.importance_min.is_finite() && self.store.importance_max.is_finite())
            || self.store.importance_min >= self.store.importance_max
        {
            return fail("store.importance_min must be < store.importance_max");
        }
        if !(self.decay.half_life_secs.is_finite() && self.decay.half_life_secs > 0.0) {
            return fail("decay.half_life_secs must be a positive number");
        }
        if !(self.decay.reinforcement_beta.is_finite() && self.decay.reinforcement_beta >= 0.0) {
            return fail("decay.reinforcement_beta must be >= 0");
        }
        if !self.retrieval.weights.is_finite() {
            return fail("retrieval.weights must be finite");
        }
        if self.retrieval.max_top_k == 0 {
            return fail("retrieval.max_top_k must be > 0");
        }
        if !self.eviction.floor.is_finite() {
            return fail("eviction.floor must be finite");
        }
        if self.eviction.enabled && self.eviction.interval_secs == 0 {
            return fail("eviction.interval_secs must be > 0 when eviction is enabled");
        }
        if self.embedding.max_concurrent == 0 {
            return fail("embedding.max_concurrent must be > 0");
        }
        if self.embedding.retry.max_attempts == 0 {
            return fail("embedding.retry.max_attempts must be >= 1");
        }
        if !(self.embedding.retry.backoff_multiplier.is_finite()
            && self.embedding.retry.backoff_multiplier >= 1.0)
        {
            return fail("embedding.retry.backoff_multiplier must be >= 1.0");
        }
        if self.narrative.history_chunk == 0 {
            return fail("narrative.history_chunk must be > 0");
        }
        if self.narrative.history_chunk > self.narrative.history_threshold {
            return fail("narrative.history_chunk must be <= narrative.history_threshold");
        }
        Ok(())
    }

    /// The importance bound shared by the store and the decay manager.
    #[must_use]
    pub fn importance_bounds(&self) -> ImportanceBounds {
        ImportanceBounds {
            min: self.store.importance_min,
            max: self.store.importance_max,
        }
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output: "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Fixed, process-wide embedding dimensionality.
    #[serde(default = "default_384")]
    pub embedding_dimensions: usize,
    /// Lower bound for `base_importance`.
    #[serde(default)]
    pub importance_min: f32,
    /// Upper bound for `base_importance`.
    #[serde(default = "default_1_0")]
    pub importance_max: f32,
    /// Longest content accepted on save, in characters.
    #[serde(default = "default_4096")]
    pub max_content_chars: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            embedding_dimensions: 384,
            importance_min: 0.0,
            importance_max: 1.0,
            max_content_chars: 4096,
        }
    }
}

/// Recency decay and reinforcement settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    /// Seconds until the recency contribution halves.
    #[serde(default = "default_half_life")]
    pub half_life_secs: f64,
    /// Reinforcement coefficient β; 0 keeps importance static.
    #[serde(default)]
    pub reinforcement_beta: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            half_life_secs: default_half_life(),
            reinforcement_beta: 0.0,
        }
    }
}

/// Ranking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// `top_k` used when a caller does not supply one.
    #[serde(default = "default_5_usize")]
    pub default_top_k: usize,
    /// Upper clamp on any requested `top_k`.
    #[serde(default = "default_100_usize")]
    pub max_top_k: usize,
    /// Candidates scoring below this are dropped. `None` keeps everything.
    #[serde(default)]
    pub min_score: Option<f64>,
    /// Query contexts shorter than this (non-whitespace chars) skip the
    /// embedding call and rank on importance alone. 0 disables.
    #[serde(default)]
    pub min_query_chars: usize,
    /// Default ranking weights.
    #[serde(default)]
    pub weights: RetrievalWeights,
    /// Keyword-overlap boost.
    #[serde(default)]
    pub keyword_boost: KeywordBoostConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: 100,
            min_score: None,
            min_query_chars: 0,
            weights: RetrievalWeights::default(),
            keyword_boost: KeywordBoostConfig::default(),
        }
    }
}

/// Ranking weights.
///
/// Need not sum to 1, but scores are only comparable across queries that
/// share a weight vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalWeights {
    /// Weight for cosine similarity.
    #[serde(default = "default_0_6")]
    pub semantic: f32,
    /// Weight for recency decay.
    #[serde(default = "default_0_2")]
    pub recency: f32,
    /// Weight for normalised effective importance.
    #[serde(default = "default_0_2")]
    pub importance: f32,
}

impl RetrievalWeights {
    /// Build a weight vector.
    #[must_use]
    pub const fn new(semantic: f32, recency: f32, importance: f32) -> Self {
        Self {
            semantic,
            recency,
            importance,
        }
    }

    /// Importance only; used for the short-query fallback.
    pub const IMPORTANCE_ONLY: Self = Self::new(0.0, 0.0, 1.0);

    /// Whether all weights are finite numbers.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.semantic.is_finite() && self.recency.is_finite() && self.importance.is_finite()
    }
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self::new(0.6, 0.2, 0.2)
    }
}

/// Additive boost for words shared by the query and the record content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordBoostConfig {
    /// Added per shared word. 0 disables the boost.
    #[serde(default)]
    pub per_match: f64,
    /// Maximum total boost.
    #[serde(default = "default_0_15")]
    pub cap: f64,
    /// Only words strictly longer than this count.
    #[serde(default = "default_4_usize")]
    pub min_word_len: usize,
}

impl Default for KeywordBoostConfig {
    fn default() -> Self {
        Self {
            per_match: 0.0,
            cap: 0.15,
            min_word_len: 4,
        }
    }
}

/// Eviction policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Whether eviction runs at all.
    #[serde(default)]
    pub enabled: bool,
    /// Records with `recency × effective_importance` below this are removed.
    #[serde(default = "default_0_05")]
    pub floor: f64,
    /// Seconds between scheduled sweeps.
    #[serde(default = "default_60")]
    pub interval_secs: u64,
    /// Size threshold; an insert that exceeds it triggers a sweep that also
    /// trims the weakest records down to this size.
    #[serde(default)]
    pub max_records: Option<usize>,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            floor: 0.05,
            interval_secs: 60,
            max_records: None,
        }
    }
}

/// Embedding provider and gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider: "ollama", "openai", "hash".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Base URL for HTTP providers.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Model name passed to the provider.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Bearer token for OpenAI-compatible providers.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Hard timeout for a single provider call in milliseconds.
    #[serde(default = "default_5000")]
    pub request_timeout_ms: u64,
    /// Max concurrent provider calls.
    #[serde(default = "default_4_usize")]
    pub max_concurrent: usize,
    /// How long a request waits for a free slot before `Overloaded`.
    #[serde(default = "default_2000")]
    pub acquire_timeout_ms: u64,
    /// LRU cache entries keyed by text. 0 disables the cache.
    #[serde(default = "default_256")]
    pub cache_capacity: usize,
    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_ollama_url(),
            model: default_embedding_model(),
            api_key: None,
            request_timeout_ms: 5000,
            max_concurrent: 4,
            acquire_timeout_ms: 2000,
            cache_capacity: 256,
            retry: RetryConfig::default(),
        }
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    #[serde(default = "default_3")]
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "default_200")]
    pub initial_delay_ms: u64,
    /// Cap on any single delay.
    #[serde(default = "default_5000")]
    pub max_delay_ms: u64,
    /// Growth factor between delays.
    #[serde(default = "default_2_0_f64")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Snapshot persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite file to restore from and save to. `None` keeps memory only.
    #[serde(default)]
    pub path: Option<std::path::PathBuf>,
    /// Write a snapshot when the service shuts down.
    #[serde(default = "default_true")]
    pub save_on_shutdown: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: None,
            save_on_shutdown: true,
        }
    }
}

/// Narrative log settings.
///
/// Moments are short summaries of recent stream events. Once the log holds
/// `history_threshold` of them, the oldest `history_chunk` are merged into
/// one ancient-history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeConfig {
    /// Summarizer: "extractive" (offline) or "ollama".
    #[serde(default = "default_summarizer")]
    pub summarizer: String,
    /// Base URL of the generation server.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Generation model.
    #[serde(default = "default_summary_model")]
    pub model: String,
    /// Timeout for one generation call in milliseconds.
    #[serde(default = "default_30000")]
    pub request_timeout_ms: u64,
    /// Log length at which the oldest moments are merged.
    #[serde(default = "default_10_usize")]
    pub history_threshold: usize,
    /// Moments consumed by one merge.
    #[serde(default = "default_5_usize")]
    pub history_chunk: usize,
    /// Cleaned moments must be longer than this (chars) to be kept.
    #[serde(default = "default_10_usize")]
    pub min_moment_chars: usize,
    /// Cleaned history entries must be longer than this (chars) to be kept.
    #[serde(default = "default_15_usize")]
    pub min_history_chars: usize,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            summarizer: default_summarizer(),
            base_url: default_ollama_url(),
            model: default_summary_model(),
            request_timeout_ms: 30_000,
            history_threshold: 10,
            history_chunk: 5,
            min_moment_chars: 10,
            min_history_chars: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }
fn default_provider() -> String { "hash".to_string() }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_embedding_model() -> String { "all-minilm".to_string() }
fn default_summarizer() -> String { "extractive".to_string() }
fn default_summary_model() -> String { "llama3.2:latest".to_string() }
fn default_0_05() -> f64 { 0.05 }
fn default_0_15() -> f64 { 0.15 }
fn default_0_2() -> f32 { 0.2 }
fn default_0_6() -> f32 { 0.6 }
fn default_1_0() -> f32 { 1.0 }
fn default_2_0_f64() -> f64 { 2.0 }
fn default_half_life() -> f64 { 3600.0 }
fn default_3() -> u32 { 3 }
fn default_4_usize() -> usize { 4 }
fn default_5_usize() -> usize { 5 }
fn default_10_usize() -> usize { 10 }
fn default_15_usize() -> usize { 15 }
fn default_60() -> u64 { 60 }
fn default_100_usize() -> usize { 100 }
fn default_200() -> u64 { 200 }
fn default_256() -> usize { 256 }
fn default_384() -> usize { 384 }
fn default_2000() -> u64 { 2000 }
fn default_4096() -> usize { 4096 }
fn default_5000() -> u64 { 5000 }
fn default_30000() -> u64 { 30_000 }
