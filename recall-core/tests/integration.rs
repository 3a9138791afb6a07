//! Integration Tests — End-to-End Memory Flows
//!
//! These tests drive the public API the way the service does: requests go
//! through the event gateway, vectors come from a provider, ranking reads
//! the shared store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use recall_core::config::{RecallConfig, RetrievalWeights};
use recall_core::embedding::{EmbeddingError, EmbeddingProvider, HashEmbeddingProvider};
use recall_core::events::{InboundRequest, OutboundEvent, QueryMemories, SaveMemory, WeightsOverride};
use recall_core::persistence::SnapshotStore;
use recall_core::retrieval::{RankQuery, RankingEngine};
use recall_core::{
    Clock, DecayManager, Embedding, EventGateway, ManualClock, MemoryId, MemoryStore, NewMemory,
    RecallError, RecordStore, ResultSink, Timestamp,
};

const DIMS: usize = 64;

fn config() -> RecallConfig {
    let mut config = RecallConfig::default();
    config.store.embedding_dimensions = DIMS;
    config.retrieval.default_top_k = 5;
    config.embedding.acquire_timeout_ms = 50;
    config.embedding.retry.initial_delay_ms = 10;
    config
}

fn gateway_with(
    config: &RecallConfig,
    provider: Arc<dyn EmbeddingProvider>,
) -> (Arc<EventGateway>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Timestamp::from_secs(10_000)));
    let store = Arc::new(MemoryStore::from_config(config));
    let gw = EventGateway::new(config, store, provider, clock.clone());
    (Arc::new(gw), clock)
}

fn hash_gateway(config: &RecallConfig) -> (Arc<EventGateway>, Arc<ManualClock>) {
    gateway_with(config, Arc::new(HashEmbeddingProvider::new(DIMS)))
}

fn save(content: &str, importance: f32) -> SaveMemory {
    SaveMemory {
        request_id: None,
        content: content.to_string(),
        base_importance: importance,
        context_timestamp: None,
        source: None,
    }
}

fn query(context: &str, top_k: usize) -> QueryMemories {
    QueryMemories {
        request_id: Some("req-1".to_string()),
        context: context.to_string(),
        top_k: Some(top_k),
        weights: None,
    }
}

fn saved_id(event: &OutboundEvent) -> MemoryId {
    match event {
        OutboundEvent::MemorySaved { id, .. } => *id,
        other => panic!("expected memory_saved, got {other:?}"),
    }
}

/// Fails `failures` times with `error`, then embeds like the hash provider.
struct FlakyProvider {
    failures: u32,
    error: EmbeddingError,
    calls: AtomicU32,
    inner: HashEmbeddingProvider,
}

impl FlakyProvider {
    fn new(failures: u32, error: EmbeddingError) -> Self {
        Self {
            failures,
            error,
            calls: AtomicU32::new(0),
            inner: HashEmbeddingProvider::new(DIMS),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyProvider {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(self.error.clone());
        }
        self.inner.embed_sync(text)
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn model_name(&self) -> &str {
        "flaky"
    }
}

/// Takes `delay` to answer every request.
struct SlowProvider {
    delay: Duration,
    inner: HashEmbeddingProvider,
}

#[async_trait]
impl EmbeddingProvider for SlowProvider {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed_sync(text)
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn model_name(&self) -> &str {
        "slow"
    }
}

// ---------------------------------------------------------------------------
// Round-trip: save then query with the same content
// ---------------------------------------------------------------------------

#[tokio::test]
async fn saved_memory_is_found_by_its_own_content() {
    let (gw, _) = hash_gateway(&config());
    let target = saved_id(&gw.handle_save(save("The innkeeper hid the stolen ring", 0.5)).await);
    gw.handle_save(save("Harvest festival starts tomorrow", 0.5)).await;
    gw.handle_save(save("A storm damaged the harbour", 0.5)).await;

    let ranked = gw.query(&query("The innkeeper hid the stolen ring", 3)).await.unwrap();
    assert_eq!(ranked[0].record.id, target);
    assert!((ranked[0].breakdown.semantic - 1.0).abs() < 1e-5);
}

// ---------------------------------------------------------------------------
// Ranking scenarios
// ---------------------------------------------------------------------------

fn engine(half_life_secs: f64) -> RankingEngine {
    let mut config = config();
    config.decay.half_life_secs = half_life_secs;
    RankingEngine::new(DecayManager::from_config(&config), &config.retrieval)
}

fn insert(store: &MemoryStore, embedding: Vec<f32>, importance: f32, at: Timestamp) -> MemoryId {
    store
        .insert(NewMemory {
            embedding: Embedding(embedding),
            content: "scenario".to_string(),
            base_importance: importance,
            created_at: at,
            source: None,
        })
        .unwrap()
}

#[test]
fn equal_recency_breaks_tie_by_id() {
    let store = MemoryStore::new(2, Default::default());
    let a = insert(&store, vec![1.0, 0.0], 0.5, Timestamp::EPOCH);
    let b = insert(&store, vec![0.0, 1.0], 0.5, Timestamp::EPOCH);
    let engine = engine(10.0);
    let q = RankQuery {
        embedding: Some(Embedding(vec![0.3, 0.7])),
        text: None,
        now: Timestamp::from_secs(10),
        top_k: 5,
        weights: RetrievalWeights::new(0.0, 1.0, 0.0),
    };

    let snapshot = store.snapshot();
    let first = engine.score_candidates(&snapshot, &q);
    assert!((first[0].breakdown.recency - 0.5).abs() < 1e-9);
    assert!((first[1].breakdown.recency - 0.5).abs() < 1e-9);
    assert_eq!(first[0].record.id, a);
    assert_eq!(first[1].record.id, b);

    for _ in 0..10 {
        let again = engine.score_candidates(&snapshot, &q);
        let ids: Vec<_> = again.iter().map(|r| r.record.id).collect();
        assert_eq!(ids, vec![a, b]);
    }
}

#[test]
fn importance_only_ranking_ignores_content() {
    let store = MemoryStore::new(2, Default::default());
    let a = insert(&store, vec![0.0, 1.0], 0.9, Timestamp::EPOCH);
    let b = insert(&store, vec![1.0, 0.0], 0.1, Timestamp::EPOCH);
    let ranked = engine(10.0)
        .rank(
            &store,
            &RankQuery {
                embedding: Some(Embedding(vec![1.0, 0.0])),
                text: None,
                now: Timestamp::EPOCH,
                top_k: 5,
                weights: RetrievalWeights::IMPORTANCE_ONLY,
            },
        )
        .unwrap();
    let ids: Vec<_> = ranked.iter().map(|r| r.record.id).collect();
    assert_eq!(ids, vec![a, b]);
}

#[tokio::test]
async fn top_k_one_returns_best_only() {
    let (gw, _) = hash_gateway(&config());
    let best = saved_id(&gw.handle_save(save("wolves attacked the sheep at night", 0.5)).await);
    gw.handle_save(save("the baker sells fresh bread", 0.5)).await;

    let event = gw.handle_query(query("wolves attacked the sheep", 1)).await;
    let OutboundEvent::MemoryResults { results, .. } = event else {
        panic!("expected results");
    };
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, best);
}

#[tokio::test]
async fn empty_store_yields_empty_results() {
    let (gw, _) = hash_gateway(&config());
    let event = gw.handle_query(query("anything", 5)).await;
    assert_eq!(
        event,
        OutboundEvent::MemoryResults {
            request_id: "req-1".to_string(),
            results: Vec::new(),
        }
    );
}

#[tokio::test]
async fn weight_override_reorders_results() {
    let (gw, _) = hash_gateway(&config());
    let similar = saved_id(&gw.handle_save(save("the bridge collapsed in the flood", 0.1)).await);
    let important = saved_id(&gw.handle_save(save("the queen arrives at dawn", 1.0)).await);

    let mut q = query("the bridge collapsed in the flood", 2);
    let ranked = gw.query(&q).await.unwrap();
    assert_eq!(ranked[0].record.id, similar);

    q.weights = Some(WeightsOverride {
        semantic: Some(0.0),
        recency: Some(0.0),
        importance: Some(1.0),
    });
    let ranked = gw.query(&q).await.unwrap();
    assert_eq!(ranked[0].record.id, important);
}

#[tokio::test]
async fn queries_reinforce_returned_records() {
    let mut config = config();
    config.decay.reinforcement_beta = 0.5;
    let (gw, clock) = hash_gateway(&config);
    let id = saved_id(&gw.handle_save(save("the old mill is haunted", 0.4)).await);

    clock.advance_secs(60);
    gw.query(&query("haunted mill", 1)).await.unwrap();

    let record = gw.store().get(id).unwrap();
    assert_eq!(record.access_count, 1);
    assert_eq!(record.last_accessed_at, clock.now());
    assert!(gw.ranking().decay().effective_importance(&record) > 0.4);
}

// ---------------------------------------------------------------------------
// Dimension validation
// ---------------------------------------------------------------------------

#[test]
fn store_rejects_wrong_dimensionality() {
    let store = MemoryStore::new(4, Default::default());
    let err = store
        .insert(NewMemory {
            embedding: Embedding(vec![1.0; 3]),
            content: "short".to_string(),
            base_importance: 0.5,
            created_at: Timestamp::EPOCH,
            source: None,
        })
        .unwrap_err();
    assert!(matches!(err, RecallError::DimensionMismatch { expected: 4, actual: 3 }));
    assert!(store.is_empty());
}

#[tokio::test]
async fn provider_with_wrong_dimensionality_fails_requests() {
    let (gw, _) = gateway_with(&config(), Arc::new(HashEmbeddingProvider::new(DIMS + 1)));

    let OutboundEvent::SaveFailed { error, .. } = gw.handle_save(save("hello there", 0.5)).await else {
        panic!("expected save_failed");
    };
    assert_eq!(error.kind, "dimension_mismatch");

    let OutboundEvent::QueryFailed { request_id, error } = gw.handle_query(query("hello", 1)).await else {
        panic!("expected query_failed");
    };
    assert_eq!(request_id, "req-1");
    assert_eq!(error.kind, "dimension_mismatch");
}

// ---------------------------------------------------------------------------
// Embedding failures: retry, exhaustion, overload, cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn transient_provider_failures_are_retried_transparently() {
    let provider = Arc::new(FlakyProvider::new(2, EmbeddingError::Unavailable("503".into())));
    let (gw, _) = gateway_with(&config(), provider.clone());

    let event = gw.handle_save(save("the guard took a bribe", 0.6)).await;
    saved_id(&event);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    assert_eq!(gw.counters().snapshot().embedding_retries, 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_to_caller() {
    let provider = Arc::new(FlakyProvider::new(
        u32::MAX,
        EmbeddingError::RateLimited { retry_after_ms: Some(100) },
    ));
    let (gw, _) = gateway_with(&config(), provider.clone());

    let event = gw.handle_save(save("the guard took a bribe", 0.6)).await;
    let OutboundEvent::SaveFailed { error, .. } = event else {
        panic!("expected save_failed");
    };
    assert_eq!(error.kind, "embedding_rate_limited");
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    assert!(gw.store().is_empty());
    assert_eq!(gw.counters().snapshot().save_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn saturated_embedding_slots_report_overload() {
    let mut config = config();
    config.embedding.max_concurrent = 1;
    let provider = Arc::new(SlowProvider {
        delay: Duration::from_secs(30),
        inner: HashEmbeddingProvider::new(DIMS),
    });
    let (gw, _) = gateway_with(&config, provider);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn ResultSink> = Arc::new(tx);

    let slow_save = gw.dispatch(InboundRequest::SaveMemory(save("slow one", 0.5)), sink.clone());
    tokio::task::yield_now().await;
    gw.dispatch(InboundRequest::QueryMemories(query("fast one", 1)), sink);

    let first = rx.recv().await.unwrap();
    let OutboundEvent::QueryFailed { error, .. } = first else {
        panic!("expected query_failed first, got {first:?}");
    };
    assert_eq!(error.kind, "overloaded");

    slow_save.await.unwrap();
    assert!(matches!(rx.recv().await.unwrap(), OutboundEvent::MemorySaved { .. }));
    assert_eq!(gw.counters().snapshot().overloaded, 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_save_releases_slot_and_stores_nothing() {
    let mut config = config();
    config.embedding.max_concurrent = 1;
    let provider = Arc::new(SlowProvider {
        delay: Duration::from_secs(5),
        inner: HashEmbeddingProvider::new(DIMS),
    });
    let (gw, _) = gateway_with(&config, provider);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn ResultSink> = Arc::new(tx);

    let handle = gw.dispatch(InboundRequest::SaveMemory(save("never lands", 0.5)), sink.clone());
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
    assert!(gw.store().is_empty());

    // The slot is free again: the next save goes through.
    gw.dispatch(InboundRequest::SaveMemory(save("this one lands", 0.5)), sink)
        .await
        .unwrap();
    assert!(matches!(rx.recv().await.unwrap(), OutboundEvent::MemorySaved { .. }));
    assert_eq!(gw.store().len(), 1);
}

#[tokio::test]
async fn bad_requests_do_not_disturb_the_store() {
    let (gw, _) = hash_gateway(&config());
    saved_id(&gw.handle_save(save("a real memory", 0.5)).await);

    let bad = [save("", 0.5), save("bad importance", -1.0), save("nan importance", f32::NAN)];
    for request in bad {
        assert!(matches!(gw.handle_save(request).await, OutboundEvent::SaveFailed { .. }));
    }
    assert_eq!(gw.store().len(), 1);
    let OutboundEvent::MemoryResults { results, .. } = gw.handle_query(query("a real memory", 5)).await else {
        panic!("expected results");
    };
    assert_eq!(results.len(), 1);
}

// ---------------------------------------------------------------------------
// Eviction & persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sweep_removes_faded_memories() {
    let mut config = config();
    config.decay.half_life_secs = 60.0;
    config.eviction.enabled = true;
    config.eviction.floor = 0.05;
    let (gw, clock) = hash_gateway(&config);
    let faint = saved_id(&gw.handle_save(save("a passing remark", 0.1)).await);
    let vivid = saved_id(&gw.handle_save(save("the castle burned down", 1.0)).await);

    // Two half-lives: faint 0.025, vivid 0.25.
    clock.advance_secs(120);
    let report = gw.evictor().sweep();
    assert_eq!(report.removed, vec![faint]);
    assert!(gw.store().get(vivid).is_some());
    assert!(!gw.store().touch(faint, clock.now()));
}

#[tokio::test]
async fn snapshot_restores_a_working_store() {
    let config = config();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memories.db");

    let store = Arc::new(MemoryStore::from_config(&config));
    let clock = Arc::new(ManualClock::new(Timestamp::from_secs(100)));
    let gw = EventGateway::new(&config, store.clone(), Arc::new(HashEmbeddingProvider::new(DIMS)), clock.clone());
    let id = saved_id(&gw.handle_save(save("the ferryman knows a secret", 0.7)).await);
    SnapshotStore::open(&path).unwrap().save(&store).unwrap();

    let restored = SnapshotStore::open(&path)
        .unwrap()
        .load(DIMS, config.importance_bounds())
        .unwrap()
        .unwrap();
    let restored = Arc::new(restored);
    let gw = EventGateway::new(&config, restored.clone(), Arc::new(HashEmbeddingProvider::new(DIMS)), clock);

    let ranked = gw.query(&query("the ferryman knows a secret", 1)).await.unwrap();
    assert_eq!(ranked[0].record.id, id);
    let next = saved_id(&gw.handle_save(save("another memory", 0.2)).await);
    assert!(next > id);
}

#[test]
fn config_from_toml_drives_the_engine() {
    let config = RecallConfig::from_toml(
        r#"
        [store]
        embedding_dimensions = 2

        [decay]
        half_life_secs = 10.0

        [retrieval.weights]
        semantic = 0.0
        recency = 1.0
        importance = 0.0
        "#,
    )
    .unwrap();
    let store = MemoryStore::from_config(&config);
    let old = insert(&store, vec![1.0, 0.0], 0.5, Timestamp::EPOCH);
    let new = insert(&store, vec![1.0, 0.0], 0.5, Timestamp::from_secs(10));
    let engine = RankingEngine::new(DecayManager::from_config(&config), &config.retrieval);
    let ranked = engine
        .rank(
            &store,
            &RankQuery {
                embedding: Some(Embedding(vec![1.0, 0.0])),
                text: None,
                now: Timestamp::from_secs(10),
                top_k: config.retrieval.default_top_k,
                weights: config.retrieval.weights,
            },
        )
        .unwrap();
    assert_eq!(ranked[0].record.id, new);
    assert!((ranked[1].score - 0.5).abs() < 1e-9);
    assert_eq!(ranked[1].record.id, old);
}
