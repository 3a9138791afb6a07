//! Request and result events exchanged with the upstream orchestrator.
//!
//! The shapes are transport-agnostic serde types; `recall-service` carries
//! them as JSON lines, tests call [`EventGateway`] directly.
//!
//! Consistency: a query may or may not observe a save that commits while
//! the query is running. There is no ordering between concurrent requests.

pub mod gateway;

pub use gateway::{EventGateway, ResultSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RetrievalWeights;
use crate::error::RecallError;
use crate::retrieval::RankedMemory;
use crate::types::MemoryId;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A request from upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundRequest {
    /// Store a new memory.
    SaveMemory(SaveMemory),
    /// Rank memories against a context.
    QueryMemories(QueryMemories),
}

/// `save_memory` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveMemory {
    /// Echoed on the reply when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Text to embed and store.
    pub content: String,
    /// Initial salience within the configured bound.
    pub base_importance: f32,
    /// When the remembered event happened; defaults to "now".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_timestamp: Option<DateTime<Utc>>,
    /// Origin label (e.g. `chat`, `microphone`), stored with the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// `query_memories` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMemories {
    /// Correlation id; generated when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Text describing the current situation.
    pub context: String,
    /// Maximum results; the configured default when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    /// Per-query weight overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<WeightsOverride>,
}

/// Partial ranking weights. Missing fields keep the configured value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightsOverride {
    /// Semantic weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic: Option<f32>,
    /// Recency weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recency: Option<f32>,
    /// Importance weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f32>,
}

impl WeightsOverride {
    /// Fill the gaps from `base`.
    #[must_use]
    pub fn apply(&self, base: RetrievalWeights) -> RetrievalWeights {
        RetrievalWeights::new(
            self.semantic.unwrap_or(base.semantic),
            self.recency.unwrap_or(base.recency),
            self.importance.unwrap_or(base.importance),
        )
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// An event sent back upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Ranked results for one query; exactly one per query request.
    MemoryResults {
        /// Correlation id of the query.
        request_id: String,
        /// Best first. Empty when nothing cleared the threshold.
        results: Vec<ResultItem>,
    },
    /// The query could not be answered.
    QueryFailed {
        /// Correlation id of the query.
        request_id: String,
        /// What went wrong.
        error: WireError,
    },
    /// A save committed.
    MemorySaved {
        /// Correlation id of the save, if it carried one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        /// Id of the new record.
        id: MemoryId,
    },
    /// A save was rejected or its embedding failed.
    SaveFailed {
        /// Correlation id of the save, if it carried one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        /// What went wrong.
        error: WireError,
    },
}

/// One ranked memory on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    /// Record id.
    pub id: MemoryId,
    /// Stored content.
    pub content: String,
    /// Combined score.
    pub score: f64,
    /// Origin label of the record, if it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl From<&RankedMemory> for ResultItem {
    fn from(ranked: &RankedMemory) -> Self {
        Self {
            id: ranked.record.id,
            content: ranked.record.content.to_string(),
            score: ranked.score,
            source: ranked.record.source.as_deref().map(str::to_string),
        }
    }
}

/// Failure on the wire: a stable `kind` plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// snake_case error kind, e.g. `dimension_mismatch`.
    pub kind: String,
    /// Display form of the error.
    pub message: String,
}

impl From<&RecallError> for WireError {
    fn from(err: &RecallError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}
