//! Per-factor scoring for hybrid retrieval.
//!
//! Score = w_sem·Semantic(m) + w_rec·Recency(m) + w_imp·Importance(m) + Keyword(m)
//!
//! Where:
//!   Semantic(m)   = cosine_similarity(query, m.embedding)       ∈ [-1, 1]
//!   Recency(m)    = exp(-λ · Δt)                                ∈ (0, 1]
//!   Importance(m) = effective importance normalised to the bound ∈ [0, 1]
//!   Keyword(m)    = min(shared_long_words · per_match, cap)     ∈ [0, cap]

use std::cmp::Ordering;
use std::collections::HashSet;

use ordered_float::OrderedFloat;

use crate::config::{KeywordBoostConfig, RetrievalWeights};
use crate::decay::DecayManager;
use crate::retrieval::{RankedMemory, ScoreBreakdown};
use crate::types::{Embedding, MemoryRecord, Timestamp};

/// Compute the unweighted components for one record.
#[must_use]
pub fn compute_breakdown(
    record: &MemoryRecord,
    query_embedding: Option<&Embedding>,
    query_words: &HashSet<String>,
    now: Timestamp,
    decay: &DecayManager,
    keyword: &KeywordBoostConfig,
) -> ScoreBreakdown {
    ScoreBreakdown {
        semantic: query_embedding.map_or(0.0, |q| q.cosine_similarity(&record.embedding)),
        recency: decay.recency_score(record, now),
        importance: decay.normalized_importance(record),
        keyword: keyword_overlap_boost(query_words, &record.content, keyword),
    }
}

/// Weighted sum of a breakdown.
#[must_use]
pub fn combine(weights: &RetrievalWeights, breakdown: &ScoreBreakdown) -> f64 {
    f64::from(weights.semantic) * breakdown.semantic
        + f64::from(weights.recency) * breakdown.recency
        + f64::from(weights.importance) * breakdown.importance
        + breakdown.keyword
}

/// Lower-cased words of `text` longer than `min_len` characters.
#[must_use]
pub fn significant_words(text: &str, min_len: usize) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > min_len)
        .map(str::to_lowercase)
        .collect()
}

/// Boost for long words shared between the query and `content`.
#[must_use]
pub fn keyword_overlap_boost(
    query_words: &HashSet<String>,
    content: &str,
    config: &KeywordBoostConfig,
) -> f64 {
    if config.per_match <= 0.0 || query_words.is_empty() {
        return 0.0;
    }
    let shared = significant_words(content, config.min_word_len)
        .intersection(query_words)
        .count();
    (shared as f64 * config.per_match).min(config.cap)
}

/// Result ordering: score descending, then newer `created_at`, then lower id.
#[must_use]
pub fn compare_ranked(a: &RankedMemory, b: &RankedMemory) -> Ordering {
    OrderedFloat(b.score)
        .cmp(&OrderedFloat(a.score))
        .then_with(|| b.record.created_at.cmp(&a.record.created_at))
        .then_with(|| a.record.id.cmp(&b.record.id))
}
