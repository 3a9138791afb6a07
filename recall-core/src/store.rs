//! Vector record store.
//!
//! The store exclusively owns every record. Readers get point-in-time
//! copies ([`MemoryRecord`]) whose content and embedding are shared `Arc`s,
//! so a snapshot is cheap and can never observe a half-inserted record.
//!
//! Record existence is "soft": `touch` and `remove` on a missing id are
//! no-ops, because eviction may race with retrieval.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::RecallConfig;
use crate::decay::DecayManager;
use crate::error::{RecallError, Result};
use crate::types::{Embedding, ImportanceBounds, MemoryId, MemoryRecord, NewMemory, Timestamp};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Narrow storage interface; a durable backend can be swapped in behind it.
///
/// All methods are linearizable per record. No ordering is guaranteed for
/// [`RecordStore::snapshot`].
pub trait RecordStore: Send + Sync {
    /// Fixed embedding dimensionality.
    fn dimensions(&self) -> usize;

    /// Bound that `base_importance` must fall within.
    fn importance_bounds(&self) -> ImportanceBounds;

    /// Validate and store a record atomically, returning its new id.
    ///
    /// # Errors
    /// `DimensionMismatch`, `InvalidImportance` or `InvalidEmbedding`.
    fn insert(&self, memory: NewMemory) -> Result<MemoryId>;

    /// Consistent point-in-time view of every record.
    fn snapshot(&self) -> Vec<MemoryRecord>;

    /// A single record, if it still exists.
    fn get(&self, id: MemoryId) -> Option<MemoryRecord>;

    /// Record a retrieval. Returns `false` (not an error) if `id` is gone.
    fn touch(&self, id: MemoryId, at: Timestamp) -> bool;

    /// Delete a record. Idempotent; returns whether anything was removed.
    fn remove(&self, id: MemoryId) -> bool;

    /// Number of stored records.
    fn len(&self) -> usize;

    /// Whether the store holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `select` over a consistent snapshot and remove the ids it
    /// returns, all under one exclusive lock. Returns the removed records.
    fn remove_where(
        &self,
        select: &mut dyn FnMut(&[MemoryRecord]) -> Vec<MemoryId>,
    ) -> Vec<MemoryRecord>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StoredRecord {
    embedding: Arc<Embedding>,
    content: Arc<str>,
    created_at: Timestamp,
    last_accessed_at: Timestamp,
    base_importance: f32,
    access_count: u32,
    source: Option<Arc<str>>,
}

impl StoredRecord {
    fn to_record(&self, id: MemoryId) -> MemoryRecord {
        MemoryRecord {
            id,
            embedding: Arc::clone(&self.embedding),
            content: Arc::clone(&self.content),
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
            base_importance: self.base_importance,
            access_count: self.access_count,
            source: self.source.clone(),
        }
    }
}

#[derive(Debug)]
struct StoreInner {
    records: BTreeMap<MemoryId, StoredRecord>,
    next_id: u64,
}

/// In-memory [`RecordStore`] guarded by a single reader/writer lock.
#[derive(Debug)]
pub struct MemoryStore {
    dims: usize,
    bounds: ImportanceBounds,
    inner: RwLock<StoreInner>,
}

/// Summary returned by [`MemoryStore::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Number of stored records.
    pub total: usize,
    /// Highest effective-importance records, strongest first.
    pub top: Vec<TopMemory>,
}

/// One entry of [`StoreStats::top`].
#[derive(Debug, Clone, Serialize)]
pub struct TopMemory {
    /// Record id.
    pub id: MemoryId,
    /// First 80 characters of the content.
    pub preview: String,
    /// Reinforced importance at the time of the call.
    pub effective_importance: f64,
    /// Times the record has been returned by a query.
    pub access_count: u32,
    /// Origin label, if the record has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl StoreStats {
    /// Summarise any snapshot; see [`MemoryStore::stats`].
    #[must_use]
    pub fn summarize(records: Vec<MemoryRecord>, decay: &DecayManager, top_n: usize) -> Self {
        let mut scored: Vec<(f64, MemoryRecord)> = records
            .into_iter()
            .map(|r| (decay.effective_importance(&r), r))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));

        Self {
            total: scored.len(),
            top: scored
                .into_iter()
                .take(top_n)
                .map(|(imp, r)| TopMemory {
                    id: r.id,
                    preview: r.content.chars().take(80).collect(),
                    effective_importance: imp,
                    access_count: r.access_count,
                    source: r.source.as_deref().map(str::to_string),
                })
                .collect(),
        }
    }
}

impl MemoryStore {
    /// Create an empty store. Ids start at 1.
    #[must_use]
    pub fn new(dimensions: usize, bounds: ImportanceBounds) -> Self {
        Self {
            dims: dimensions,
            bounds,
            inner: RwLock::new(StoreInner {
                records: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Create an empty store from configuration.
    #[must_use]
    pub fn from_config(config: &RecallConfig) -> Self {
        Self::new(config.store.embedding_dimensions, config.importance_bounds())
    }

    /// Rebuild a store from previously saved records.
    ///
    /// The id counter resumes at `next_id` or one past the largest restored
    /// id, whichever is larger, so ids are never reused.
    ///
    /// # Errors
    /// `DimensionMismatch` if any record disagrees with `dimensions`.
    pub fn restore(
        dimensions: usize,
        bounds: ImportanceBounds,
        records: Vec<MemoryRecord>,
        next_id: u64,
    ) -> Result<Self> {
        let mut map = BTreeMap::new();
        let mut counter = next_id.max(1);
        for record in records {
            if record.embedding.dimensions() != dimensions {
                return Err(RecallError::DimensionMismatch {
                    expected: dimensions,
                    actual: record.embedding.dimensions(),
                });
            }
            counter = counter.max(record.id.0.saturating_add(1));
            map.insert(
                record.id,
                StoredRecord {
                    embedding: record.embedding,
                    content: record.content,
                    created_at: record.created_at,
                    last_accessed_at: record.last_accessed_at.max(record.created_at),
                    base_importance: record.base_importance,
                    access_count: record.access_count,
                    source: record.source,
                },
            );
        }
        debug!(records = map.len(), next_id = counter, "Restored memory store");
        Ok(Self {
            dims: dimensions,
            bounds,
            inner: RwLock::new(StoreInner {
                records: map,
                next_id: counter,
            }),
        })
    }

    /// The id the next insert will receive.
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.inner.read().next_id
    }

    /// Total count plus the `top_n` records with the highest effective
    /// importance (ties: lower id first).
    #[must_use]
    pub fn stats(&self, decay: &DecayManager, top_n: usize) -> StoreStats {
        StoreStats::summarize(self.snapshot(), decay, top_n)
    }

    fn validate(&self, memory: &NewMemory) -> Result<()> {
        if memory.embedding.dimensions() != self.dims {
            return Err(RecallError::DimensionMismatch {
                expected: self.dims,
                actual: memory.embedding.dimensions(),
            });
        }
        if !memory.embedding.is_finite() {
            return Err(RecallError::InvalidEmbedding(
                "embedding contains NaN or infinite components".to_string(),
            ));
        }
        if !self.bounds.contains(memory.base_importance) {
            return Err(RecallError::InvalidImportance {
                value: memory.base_importance,
                min: self.bounds.min,
                max: self.bounds.max,
            });
        }
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn dimensions(&self) -> usize {
        self.dims
    }

    fn importance_bounds(&self) -> ImportanceBounds {
        self.bounds
    }

    fn insert(&self, memory: NewMemory) -> Result<MemoryId> {
        self.validate(&memory)?;

        // Build the record before taking the lock; the insert itself is a
        // single map operation.
        let stored = StoredRecord {
            embedding: Arc::new(memory.embedding),
            content: Arc::from(memory.content),
            created_at: memory.created_at,
            last_accessed_at: memory.created_at,
            base_importance: memory.base_importance,
            access_count: 0,
            source: memory.source.map(Arc::from),
        };

        let mut inner = self.inner.write();
        let id = MemoryId(inner.next_id);
        inner.next_id += 1;
        inner.records.insert(id, stored);
        trace!(%id, total = inner.records.len(), "Inserted memory");
        Ok(id)
    }

    fn snapshot(&self) -> Vec<MemoryRecord> {
        let inner = self.inner.read();
        inner
            .records
            .iter()
            .map(|(id, stored)| stored.to_record(*id))
            .collect()
    }

    fn get(&self, id: MemoryId) -> Option<MemoryRecord> {
        self.inner.read().records.get(&id).map(|s| s.to_record(id))
    }

    fn touch(&self, id: MemoryId, at: Timestamp) -> bool {
        let mut inner = self.inner.write();
        match inner.records.get_mut(&id) {
            Some(stored) => {
                stored.last_accessed_at = stored.last_accessed_at.max(at);
                stored.access_count = stored.access_count.saturating_add(1);
                true
            }
            None => {
                trace!(%id, "Touch on missing memory ignored");
                false
            }
        }
    }

    fn remove(&self, id: MemoryId) -> bool {
        self.inner.write().records.remove(&id).is_some()
    }

    fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    fn remove_where(
        &self,
        select: &mut dyn FnMut(&[MemoryRecord]) -> Vec<MemoryId>,
    ) -> Vec<MemoryRecord> {
        let mut inner = self.inner.write();
        let view: Vec<MemoryRecord> = inner
            .records
            .iter()
            .map(|(id, stored)| stored.to_record(*id))
            .collect();

        select(&view)
            .into_iter()
            .filter_map(|id| inner.records.remove(&id).map(|s| s.to_record(id)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecayConfig;

    fn store() -> MemoryStore {
        MemoryStore::new(3, ImportanceBounds::default())
    }

    fn new_memory(content: &str, importance: f32, at: u64) -> NewMemory {
        NewMemory {
            embedding: Embedding(vec![1.0, 0.0, 0.0]),
            content: content.to_string(),
            base_importance: importance,
            created_at: Timestamp::from_secs(at),
            source: None,
        }
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let s = store();
        let a = s.insert(new_memory("a", 0.5, 0)).expect("insert");
        let b = s.insert(new_memory("b", 0.5, 0)).expect("insert");
        assert_eq!(a, MemoryId(1));
        assert_eq!(b, MemoryId(2));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn new_record_starts_unaccessed() {
        let s = store();
        let id = s.insert(new_memory("a", 0.5, 7)).expect("insert");
        let r = s.get(id).expect("present");
        assert_eq!(r.created_at, r.last_accessed_at);
        assert_eq!(r.access_count, 0);
        assert_eq!(&*r.content, "a");
    }

    #[test]
    fn rejects_wrong_dimensionality() {
        let s = store();
        let mut m = new_memory("a", 0.5, 0);
        m.embedding = Embedding(vec![1.0, 0.0]);
        let err = s.insert(m).expect_err("mismatch");
        assert!(matches!(
            err,
            RecallError::DimensionMismatch { expected: 3, actual: 2 }
        ));
        assert!(s.is_empty());
    }

    #[test]
    fn rejects_out_of_bound_importance() {
        let s = store();
        for bad in [-0.1, 1.1, f32::NAN] {
            let err = s.insert(new_memory("a", bad, 0)).expect_err("out of bound");
            assert!(matches!(err, RecallError::InvalidImportance { .. }));
        }
        assert!(s.insert(new_memory("edge", 1.0, 0)).is_ok());
        assert!(s.insert(new_memory("edge", 0.0, 0)).is_ok());
    }

    #[test]
    fn rejects_non_finite_embedding() {
        let s = store();
        let mut m = new_memory("a", 0.5, 0);
        m.embedding = Embedding(vec![f32::NAN, 0.0, 0.0]);
        assert!(matches!(s.insert(m), Err(RecallError::InvalidEmbedding(_))));
    }

    #[test]
    fn touch_updates_access_metadata() {
        let s = store();
        let id = s.insert(new_memory("a", 0.5, 10)).expect("insert");
        assert!(s.touch(id, Timestamp::from_secs(20)));
        assert!(s.touch(id, Timestamp::from_secs(30)));
        let r = s.get(id).expect("present");
        assert_eq!(r.access_count, 2);
        assert_eq!(r.last_accessed_at, Timestamp::from_secs(30));
    }

    #[test]
    fn touch_never_moves_access_before_creation() {
        let s = store();
        let id = s.insert(new_memory("a", 0.5, 100)).expect("insert");
        s.touch(id, Timestamp::from_secs(50));
        let r = s.get(id).expect("present");
        assert!(r.created_at <= r.last_accessed_at);
        assert_eq!(r.access_count, 1);
    }

    #[test]
    fn touch_and_remove_on_missing_id_are_no_ops() {
        let s = store();
        let id = s.insert(new_memory("a", 0.5, 0)).expect("insert");
        assert!(s.remove(id));
        assert!(!s.remove(id));
        assert!(!s.touch(id, Timestamp::from_secs(1)));
        assert!(s.get(id).is_none());
    }

    #[test]
    fn ids_are_not_reused_after_removal() {
        let s = store();
        let a = s.insert(new_memory("a", 0.5, 0)).expect("insert");
        s.remove(a);
        let b = s.insert(new_memory("b", 0.5, 0)).expect("insert");
        assert!(b > a);
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let s = store();
        let id = s.insert(new_memory("a", 0.5, 0)).expect("insert");
        let before = s.snapshot();
        s.touch(id, Timestamp::from_secs(99));
        s.insert(new_memory("b", 0.5, 0)).expect("insert");
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].access_count, 0);
    }

    #[test]
    fn remove_where_is_atomic_over_one_view() {
        let s = store();
        for i in 0..5 {
            s.insert(new_memory(&format!("m{i}"), 0.1 * i as f32, 0)).expect("insert");
        }
        let removed = s.remove_where(&mut |view: &[MemoryRecord]| {
            assert_eq!(view.len(), 5);
            view.iter().filter(|r| r.base_importance < 0.25).map(|r| r.id).collect()
        });
        assert_eq!(removed.len(), 3);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn restore_resumes_id_counter() {
        let s = store();
        s.insert(new_memory("a", 0.5, 0)).expect("insert");
        s.insert(new_memory("b", 0.5, 0)).expect("insert");
        let restored =
            MemoryStore::restore(3, ImportanceBounds::default(), s.snapshot(), 1).expect("restore");
        let c = restored.insert(new_memory("c", 0.5, 0)).expect("insert");
        assert_eq!(c, MemoryId(3));
    }

    #[test]
    fn restore_rejects_foreign_dimensionality() {
        let s = store();
        s.insert(new_memory("a", 0.5, 0)).expect("insert");
        let err = MemoryStore::restore(4, ImportanceBounds::default(), s.snapshot(), 2)
            .expect_err("mismatch");
        assert!(matches!(err, RecallError::DimensionMismatch { .. }));
    }

    #[test]
    fn stats_rank_by_effective_importance() {
        let s = store();
        s.insert(new_memory("low", 0.1, 0)).expect("insert");
        s.insert(new_memory("high", 0.9, 0)).expect("insert");
        s.insert(new_memory("mid", 0.5, 0)).expect("insert");
        let decay = DecayManager::new(&DecayConfig::default(), ImportanceBounds::default());
        let stats = s.stats(&decay, 2);
        assert_eq!(stats.total, 3);
        let previews: Vec<_> = stats.top.iter().map(|t| t.preview.as_str()).collect();
        assert_eq!(previews, vec!["high", "mid"]);
    }

    #[test]
    fn source_label_is_kept_and_reported() {
        let s = store();
        let mut labelled = new_memory("chat says hi", 0.7, 0);
        labelled.source = Some("chat".into());
        let id = s.insert(labelled).expect("insert");
        s.insert(new_memory("unlabelled", 0.2, 0)).expect("insert");

        assert_eq!(s.get(id).and_then(|r| r.source).as_deref(), Some("chat"));
        let decay = DecayManager::new(&DecayConfig::default(), ImportanceBounds::default());
        let stats = s.stats(&decay, 2);
        assert_eq!(stats.top[0].source.as_deref(), Some("chat"));
        assert_eq!(stats.top[1].source, None);
    }

    #[test]
    fn concurrent_inserts_never_expose_partial_records() {
        let s = Arc::new(MemoryStore::new(64, ImportanceBounds::default()));
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        s.insert(NewMemory {
                            embedding: Embedding(vec![1.0; 64]),
                            content: format!("w{w}-{i}"),
                            base_importance: 0.5,
                            created_at: Timestamp::from_secs(i),
                            source: None,
                        })
                        .expect("insert");
                    }
                })
            })
            .collect();

        for _ in 0..50 {
            for r in s.snapshot() {
                assert_eq!(r.embedding.dimensions(), 64);
                assert!(!r.content.is_empty());
            }
        }
        for w in writers {
            w.join().expect("writer thread");
        }
        assert_eq!(s.len(), 800);
    }
}
