//! Hybrid retrieval: brute-force scan plus three-signal scoring.
//!
//! Every record in a consistent store snapshot is scored with
//! [`scoring::compute_breakdown`] and [`scoring::combine`], sorted with
//! [`scoring::compare_ranked`], filtered by `min_score` and truncated to
//! `top_k`. Records that make the cut are then touched in the store, which
//! feeds recency and reinforcement on later queries.
//!
//! [`RankingEngine::score_candidates`] is the pure half of that pipeline and
//! is deterministic for identical records, query and clock value.

pub mod scoring;

use tracing::debug;

use crate::config::{KeywordBoostConfig, RetrievalConfig, RetrievalWeights};
use crate::decay::DecayManager;
use crate::error::{RecallError, Result};
use crate::store::RecordStore;
use crate::types::{Embedding, MemoryRecord, Timestamp};

/// A scored retrieval result.
#[derive(Debug, Clone)]
pub struct RankedMemory {
    /// The record as seen in the snapshot the query ranked over.
    pub record: MemoryRecord,
    /// Combined score.
    pub score: f64,
    /// Unweighted components of the score.
    pub breakdown: ScoreBreakdown,
}

/// Breakdown of a retrieval score into its (unweighted) components.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreBreakdown {
    /// Cosine similarity to the query, in \[-1, 1\].
    pub semantic: f64,
    /// Recency, in (0, 1\].
    pub recency: f64,
    /// Normalised effective importance, in \[0, 1\].
    pub importance: f64,
    /// Keyword overlap boost, already scaled and capped.
    pub keyword: f64,
}

/// One ranking request.
#[derive(Debug, Clone)]
pub struct RankQuery {
    /// Query vector. `None` ranks without a semantic signal.
    pub embedding: Option<Embedding>,
    /// Raw query text, used for the keyword boost.
    pub text: Option<String>,
    /// Evaluation time.
    pub now: Timestamp,
    /// Maximum number of results.
    pub top_k: usize,
    /// Weights for this query.
    pub weights: RetrievalWeights,
}

/// Scores and ranks store records against a query.
#[derive(Debug, Clone)]
pub struct RankingEngine {
    decay: DecayManager,
    max_top_k: usize,
    min_score: Option<f64>,
    keyword: KeywordBoostConfig,
}

impl RankingEngine {
    /// Create an engine from the decay manager and the retrieval section.
    #[must_use]
    pub fn new(decay: DecayManager, config: &RetrievalConfig) -> Self {
        Self {
            decay,
            max_top_k: config.max_top_k,
            min_score: config.min_score,
            keyword: config.keyword_boost.clone(),
        }
    }

    /// The decay manager the engine scores with.
    #[must_use]
    pub fn decay(&self) -> &DecayManager {
        &self.decay
    }

    /// Score, order, filter and truncate `candidates`. No side effects.
    #[must_use]
    pub fn score_candidates(&self, candidates: &[MemoryRecord], query: &RankQuery) -> Vec<RankedMemory> {
        let top_k = query.top_k.min(self.max_top_k);
        if top_k == 0 || candidates.is_empty() {
            return Vec::new();
        }

        let query_words = match (&query.text, self.keyword.per_match > 0.0) {
            (Some(text), true) => scoring::significant_words(text, self.keyword.min_word_len),
            _ => Default::default(),
        };

        let mut ranked: Vec<RankedMemory> = candidates
            .iter()
            .map(|record| {
                let breakdown = scoring::compute_breakdown(
                    record,
                    query.embedding.as_ref(),
                    &query_words,
                    query.now,
                    &self.decay,
                    &self.keyword,
                );
                RankedMemory {
                    record: record.clone(),
                    score: scoring::combine(&query.weights, &breakdown),
                    breakdown,
                }
            })
            .filter(|r| self.min_score.is_none_or(|min| r.score >= min))
            .collect();

        ranked.sort_by(scoring::compare_ranked);
        ranked.truncate(top_k);
        ranked
    }

    /// Rank the store's current contents and touch every returned record.
    ///
    /// # Errors
    ///
    /// [`RecallError::DimensionMismatch`] when the query vector's length
    /// differs from the store's.
    pub fn rank(&self, store: &dyn RecordStore, query: &RankQuery) -> Result<Vec<RankedMemory>> {
        if let Some(embedding) = &query.embedding {
            let expected = store.dimensions();
            if embedding.dimensions() != expected {
                return Err(RecallError::DimensionMismatch {
                    expected,
                    actual: embedding.dimensions(),
                });
            }
        }

        let snapshot = store.snapshot();
        let ranked = self.score_candidates(&snapshot, query);

        for result in &ranked {
            // A concurrent sweep may have removed it; that is fine.
            store.touch(result.record.id, query.now);
        }

        debug!(
            candidates = snapshot.len(),
            returned = ranked.len(),
            top_score = ranked.first().map(|r| r.score),
            "Ranked memories"
        );
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecayConfig;
    use crate::store::MemoryStore;
    use crate::types::{ImportanceBounds, MemoryId, NewMemory};

    fn engine(half_life_secs: f64) -> RankingEngine {
        let decay = DecayManager::new(
            &DecayConfig {
                half_life_secs,
                reinforcement_beta: 0.0,
            },
            ImportanceBounds::default(),
        );
        RankingEngine::new(decay, &RetrievalConfig::default())
    }

    fn save(store: &MemoryStore, v: [f32; 2], importance: f32, at: u64) -> MemoryId {
        store
            .insert(NewMemory {
                embedding: Embedding(v.to_vec()),
                content: format!("memory {v:?}"),
                base_importance: importance,
                created_at: Timestamp::from_secs(at),
                source: None,
            })
            .expect("insert")
    }

    fn query(v: [f32; 2], now: u64, top_k: usize, weights: RetrievalWeights) -> RankQuery {
        RankQuery {
            embedding: Some(Embedding(v.to_vec())),
            text: None,
            now: Timestamp::from_secs(now),
            top_k,
            weights,
        }
    }

    #[test]
    fn self_query_has_unit_semantic_score() {
        let store = MemoryStore::new(2, ImportanceBounds::default());
        let id = save(&store, [0.6, 0.8], 0.5, 0);
        let results = engine(10.0)
            .rank(&store, &query([0.6, 0.8], 0, 5, RetrievalWeights::default()))
            .expect("rank");
        assert_eq!(results[0].record.id, id);
        assert!((results[0].breakdown.semantic - 1.0).abs() < 1e-6);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let store = MemoryStore::new(2, ImportanceBounds::default());
        save(&store, [1.0, 0.0], 0.5, 0);
        let mut q = query([1.0, 0.0], 0, 5, RetrievalWeights::default());
        q.embedding = Some(Embedding(vec![1.0, 0.0, 0.0]));
        let err = engine(10.0).rank(&store, &q).unwrap_err();
        assert!(matches!(err, RecallError::DimensionMismatch { expected: 2, actual: 3 }));
    }

    #[test]
    fn recency_tie_resolves_by_id() {
        let store = MemoryStore::new(2, ImportanceBounds::default());
        let a = save(&store, [1.0, 0.0], 0.5, 0);
        let b = save(&store, [0.0, 1.0], 0.5, 0);
        let results = engine(10.0)
            .rank(&store, &query([1.0, 0.0], 10, 5, RetrievalWeights::new(0.0, 1.0, 0.0)))
            .expect("rank");
        assert_eq!(results.len(), 2);
        assert!((results[0].score - 0.5).abs() < 1e-9);
        assert!((results[1].score - 0.5).abs() < 1e-9);
        assert_eq!(results[0].record.id, a);
        assert_eq!(results[1].record.id, b);
    }

    #[test]
    fn importance_only_weights_ignore_content() {
        let store = MemoryStore::new(2, ImportanceBounds::default());
        let low = save(&store, [1.0, 0.0], 0.1, 0);
        let high = save(&store, [0.0, 1.0], 0.9, 0);
        let results = engine(10.0)
            .rank(&store, &query([1.0, 0.0], 0, 5, RetrievalWeights::IMPORTANCE_ONLY))
            .expect("rank");
        let ids: Vec<_> = results.iter().map(|r| r.record.id).collect();
        assert_eq!(ids, vec![high, low]);
    }

    #[test]
    fn top_k_truncates_to_best() {
        let store = MemoryStore::new(2, ImportanceBounds::default());
        save(&store, [0.0, 1.0], 0.5, 0);
        let best = save(&store, [1.0, 0.0], 0.5, 0);
        let results = engine(10.0)
            .rank(&store, &query([1.0, 0.0], 0, 1, RetrievalWeights::default()))
            .expect("rank");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.id, best);
    }

    #[test]
    fn empty_store_and_zero_top_k_return_nothing() {
        let store = MemoryStore::new(2, ImportanceBounds::default());
        let e = engine(10.0);
        assert!(e.rank(&store, &query([1.0, 0.0], 0, 5, RetrievalWeights::default())).expect("rank").is_empty());
        save(&store, [1.0, 0.0], 0.5, 0);
        assert!(e.rank(&store, &query([1.0, 0.0], 0, 0, RetrievalWeights::default())).expect("rank").is_empty());
    }

    #[test]
    fn top_k_is_clamped_to_max() {
        let store = MemoryStore::new(2, ImportanceBounds::default());
        for i in 0..5 {
            save(&store, [1.0, 0.0], 0.5, i);
        }
        let config = RetrievalConfig {
            max_top_k: 3,
            ..RetrievalConfig::default()
        };
        let e = RankingEngine::new(engine(10.0).decay().clone(), &config);
        let results = e
            .rank(&store, &query([1.0, 0.0], 10, 50, RetrievalWeights::default()))
            .expect("rank");
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn min_score_filters_weak_candidates() {
        let store = MemoryStore::new(2, ImportanceBounds::default());
        let strong = save(&store, [1.0, 0.0], 0.5, 0);
        save(&store, [-1.0, 0.0], 0.5, 0);
        let config = RetrievalConfig {
            min_score: Some(0.5),
            ..RetrievalConfig::default()
        };
        let e = RankingEngine::new(engine(10.0).decay().clone(), &config);
        let results = e
            .rank(&store, &query([1.0, 0.0], 0, 5, RetrievalWeights::new(1.0, 0.0, 0.0)))
            .expect("rank");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.id, strong);
    }

    #[test]
    fn returned_records_are_touched() {
        let store = MemoryStore::new(2, ImportanceBounds::default());
        let hit = save(&store, [1.0, 0.0], 0.5, 0);
        let miss = save(&store, [0.0, 1.0], 0.5, 0);
        engine(10.0)
            .rank(&store, &query([1.0, 0.0], 30, 1, RetrievalWeights::new(1.0, 0.0, 0.0)))
            .expect("rank");

        let hit = store.get(hit).expect("hit");
        assert_eq!(hit.access_count, 1);
        assert_eq!(hit.last_accessed_at, Timestamp::from_secs(30));
        assert_eq!(store.get(miss).expect("miss").access_count, 0);
    }

    #[test]
    fn score_candidates_is_repeatable() {
        let store = MemoryStore::new(2, ImportanceBounds::default());
        for (i, v) in [[1.0, 0.0], [0.7, 0.7], [0.0, 1.0], [0.7, 0.7]].into_iter().enumerate() {
            save(&store, v, 0.3, i as u64);
        }
        let snapshot = store.snapshot();
        let q = query([0.9, 0.1], 100, 4, RetrievalWeights::default());
        let e = engine(60.0);
        let first: Vec<_> = e.score_candidates(&snapshot, &q).iter().map(|r| r.record.id).collect();
        let second: Vec<_> = e.score_candidates(&snapshot, &q).iter().map(|r| r.record.id).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_embedding_ranks_without_semantics() {
        let store = MemoryStore::new(2, ImportanceBounds::default());
        save(&store, [1.0, 0.0], 0.2, 0);
        let high = save(&store, [0.0, 1.0], 0.8, 0);
        let q = RankQuery {
            embedding: None,
            text: Some("hi".into()),
            now: Timestamp::EPOCH,
            top_k: 5,
            weights: RetrievalWeights::IMPORTANCE_ONLY,
        };
        let results = engine(10.0).rank(&store, &q).expect("rank");
        assert_eq!(results[0].record.id, high);
        assert_eq!(results[0].breakdown.semantic, 0.0);
    }
}
