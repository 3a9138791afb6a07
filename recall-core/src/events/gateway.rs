//! Adapter from request events to store and ranking calls.
//!
//! The gateway owns no algorithm of its own. A save is validated, embedded
//! (outside any store lock), inserted, and may trigger a size-based sweep.
//! A query is embedded, then ranked against a fresh snapshot. Both produce
//! exactly one [`OutboundEvent`]; no failure escapes as a panic.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{RecallConfig, RetrievalConfig, RetrievalWeights};
use crate::decay::DecayManager;
use crate::embedding::{EmbeddingGateway, EmbeddingProvider};
use crate::error::{RecallError, Result};
use crate::eviction::{EvictionPolicy, Evictor};
use crate::events::{InboundRequest, OutboundEvent, QueryMemories, ResultItem, SaveMemory, WireError};
use crate::metrics::RecallCounters;
use crate::retrieval::{RankQuery, RankedMemory, RankingEngine};
use crate::store::{RecordStore, StoreStats};
use crate::types::{MemoryId, NewMemory, Timestamp};

/// Where outbound events go.
pub trait ResultSink: Send + Sync {
    /// Deliver one event. Must not block.
    fn emit(&self, event: OutboundEvent);
}

impl ResultSink for mpsc::UnboundedSender<OutboundEvent> {
    fn emit(&self, event: OutboundEvent) {
        if self.send(event).is_err() {
            debug!("Result receiver dropped; event discarded");
        }
    }
}

/// Handles `save_memory` and `query_memories` requests.
pub struct EventGateway {
    store: Arc<dyn RecordStore>,
    embedder: EmbeddingGateway,
    ranking: RankingEngine,
    evictor: Arc<Evictor>,
    eviction_enabled: bool,
    clock: Arc<dyn Clock>,
    counters: Arc<RecallCounters>,
    retrieval: RetrievalConfig,
    max_content_chars: usize,
}

impl EventGateway {
    /// Wire a gateway over `store` and `provider` from configuration.
    #[must_use]
    pub fn new(
        config: &RecallConfig,
        store: Arc<dyn RecordStore>,
        provider: Arc<dyn EmbeddingProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let counters = Arc::new(RecallCounters::new());
        let decay = DecayManager::new(&config.decay, store.importance_bounds());
        let embedder = EmbeddingGateway::new(
            provider,
            store.dimensions(),
            &config.embedding,
            Arc::clone(&counters),
        );
        let evictor = Arc::new(Evictor::new(
            Arc::clone(&store),
            decay.clone(),
            EvictionPolicy::from_config(&config.eviction),
            Arc::clone(&clock),
            Arc::clone(&counters),
        ));

        Self {
            ranking: RankingEngine::new(decay, &config.retrieval),
            store,
            embedder,
            evictor,
            eviction_enabled: config.eviction.enabled,
            clock,
            counters,
            retrieval: config.retrieval.clone(),
            max_content_chars: config.store.max_content_chars,
        }
    }

    /// Replace the embedding gateway (e.g. to change its retry policy).
    #[must_use]
    pub fn with_embedder(mut self, embedder: EmbeddingGateway) -> Self {
        self.embedder = embedder;
        self
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Shared counters.
    #[must_use]
    pub fn counters(&self) -> &Arc<RecallCounters> {
        &self.counters
    }

    /// The evictor, for scheduling sweeps.
    #[must_use]
    pub fn evictor(&self) -> &Arc<Evictor> {
        &self.evictor
    }

    /// The ranking engine.
    #[must_use]
    pub fn ranking(&self) -> &RankingEngine {
        &self.ranking
    }

    /// Record count and the strongest `top_n` memories.
    #[must_use]
    pub fn stats(&self, top_n: usize) -> StoreStats {
        StoreStats::summarize(self.store.snapshot(), self.ranking.decay(), top_n)
    }

    // -----------------------------------------------------------------------
    // Typed entry points
    // -----------------------------------------------------------------------

    /// Validate, embed and insert a memory.
    ///
    /// Once the insert has committed the save stands, even if the caller
    /// stops waiting afterwards. A size-triggered sweep after the insert
    /// never removes the new record, so the returned id is always live.
    ///
    /// # Errors
    ///
    /// Content, importance, embedding and dimensionality failures.
    pub async fn save(&self, request: &SaveMemory) -> Result<MemoryId> {
        self.check_content(&request.content)?;
        let bounds = self.store.importance_bounds();
        if !bounds.contains(request.base_importance) {
            return Err(RecallError::InvalidImportance {
                value: request.base_importance,
                min: bounds.min,
                max: bounds.max,
            });
        }

        let embedding = self.embedder.embed(&request.content).await?;
        let created_at = request
            .context_timestamp
            .map_or_else(|| self.clock.now(), Timestamp::from_datetime);

        let id = self.store.insert(NewMemory {
            embedding,
            content: request.content.clone(),
            base_importance: request.base_importance,
            created_at,
            source: request.source.clone(),
        })?;
        info!(%id, importance = request.base_importance, total = self.store.len(), "Memory saved");

        if self.eviction_enabled {
            self.evictor.sweep_after_insert(id);
        }
        Ok(id)
    }

    /// Embed the context and rank the store against it.
    ///
    /// # Errors
    ///
    /// Embedding and dimensionality failures.
    pub async fn query(&self, request: &QueryMemories) -> Result<Vec<RankedMemory>> {
        let base = request
            .weights
            .map_or(self.retrieval.weights, |w| w.apply(self.retrieval.weights));
        let top_k = request.top_k.unwrap_or(self.retrieval.default_top_k);

        let significant = request.context.chars().filter(|c| !c.is_whitespace()).count();
        let (embedding, weights) = if significant < self.retrieval.min_query_chars {
            debug!(significant, "Short query context; ranking by importance only");
            (None, RetrievalWeights::IMPORTANCE_ONLY)
        } else {
            (Some(self.embedder.embed(&request.context).await?), base)
        };

        let query = RankQuery {
            embedding,
            text: Some(request.context.clone()),
            now: self.clock.now(),
            top_k,
            weights,
        };
        self.ranking.rank(self.store.as_ref(), &query)
    }

    // -----------------------------------------------------------------------
    // Event entry points
    // -----------------------------------------------------------------------

    /// Answer a save request with `memory_saved` or `save_failed`.
    pub async fn handle_save(&self, request: SaveMemory) -> OutboundEvent {
        match self.save(&request).await {
            Ok(id) => {
                RecallCounters::incr(&self.counters.saves);
                OutboundEvent::MemorySaved {
                    request_id: request.request_id,
                    id,
                }
            }
            Err(err) => {
                RecallCounters::incr(&self.counters.save_failures);
                warn!(kind = err.kind(), error = %err, "Save failed");
                OutboundEvent::SaveFailed {
                    request_id: request.request_id,
                    error: WireError::from(&err),
                }
            }
        }
    }

    /// Answer a query with exactly one `memory_results` or `query_failed`.
    pub async fn handle_query(&self, request: QueryMemories) -> OutboundEvent {
        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        match self.query(&request).await {
            Ok(ranked) => {
                RecallCounters::incr(&self.counters.queries);
                RecallCounters::add(&self.counters.results_returned, ranked.len() as u64);
                info!(%request_id, returned = ranked.len(), "Query answered");
                OutboundEvent::MemoryResults {
                    request_id,
                    results: ranked.iter().map(ResultItem::from).collect(),
                }
            }
            Err(err) => {
                RecallCounters::incr(&self.counters.query_failures);
                warn!(%request_id, kind = err.kind(), error = %err, "Query failed");
                OutboundEvent::QueryFailed {
                    request_id,
                    error: WireError::from(&err),
                }
            }
        }
    }

    /// Answer any request.
    pub async fn handle(&self, request: InboundRequest) -> OutboundEvent {
        match request {
            InboundRequest::SaveMemory(save) => self.handle_save(save).await,
            InboundRequest::QueryMemories(query) => self.handle_query(query).await,
        }
    }

    /// Handle `request` on its own task and send the reply to `sink`.
    ///
    /// Aborting the returned handle cancels the request; a save that has
    /// already committed is not rolled back.
    pub fn dispatch(self: &Arc<Self>, request: InboundRequest, sink: Arc<dyn ResultSink>) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let event = gateway.handle(request).await;
            sink.emit(event);
        })
    }

    fn check_content(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(RecallError::ContentRejected {
                reason: "content is empty".into(),
            });
        }
        let chars = content.chars().count();
        if chars > self.max_content_chars {
            return Err(RecallError::ContentRejected {
                reason: format!("content has {chars} characters, limit is {}", self.max_content_chars),
            });
        }
        Ok(())
    }
}
