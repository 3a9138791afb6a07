//! Score-based eviction.
//!
//! A record's retention is `recency × effective_importance` (see
//! [`crate::decay`]). A sweep removes, under the store's exclusive lock:
//!
//! 1. every record whose retention is below the configured floor, and
//! 2. if the store is still above `max_records`, the weakest survivors
//!    until it is not.
//!
//! Removal order is lowest retention first, then oldest `created_at`, then
//! lowest id, so sweeps are deterministic for a given clock value.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::EvictionConfig;
use crate::decay::DecayManager;
use crate::metrics::RecallCounters;
use crate::store::RecordStore;
use crate::types::{MemoryId, MemoryRecord, Timestamp};

// ---------------------------------------------------------------------------
// Policy & selection
// ---------------------------------------------------------------------------

/// Thresholds a sweep enforces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionPolicy {
    /// Retention floor.
    pub floor: f64,
    /// Optional size cap.
    pub max_records: Option<usize>,
}

impl EvictionPolicy {
    /// Build from the eviction section.
    #[must_use]
    pub fn from_config(config: &EvictionConfig) -> Self {
        Self {
            floor: config.floor,
            max_records: config.max_records,
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvictionReport {
    /// Ids removed, in removal order.
    pub removed: Vec<MemoryId>,
    /// How many of those fell below the floor.
    pub below_floor: usize,
    /// How many were trimmed only to honour `max_records`.
    pub over_capacity: usize,
    /// Records left after the sweep.
    pub remaining: usize,
}

/// Pick the ids a sweep should remove from `records`.
///
/// Returns `(ids, below_floor_count)`; `ids` is in removal order.
#[must_use]
pub fn select_evictions(
    records: &[MemoryRecord],
    now: Timestamp,
    decay: &DecayManager,
    policy: &EvictionPolicy,
) -> (Vec<MemoryId>, usize) {
    let mut scored: Vec<(f64, Timestamp, MemoryId)> = records
        .iter()
        .map(|r| (decay.retention(r, now), r.created_at, r.id))
        .collect();

    // Weakest first; oldest first among equal retention.
    scored.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.cmp(&b.2))
    });

    let below_floor = scored.iter().take_while(|s| s.0 < policy.floor).count();
    let over_capacity = policy
        .max_records
        .map_or(0, |cap| scored.len().saturating_sub(cap));
    let cut = below_floor.max(over_capacity);

    (scored.into_iter().take(cut).map(|s| s.2).collect(), below_floor)
}

/// Run one sweep against `store`.
pub fn evict(
    store: &dyn RecordStore,
    decay: &DecayManager,
    policy: &EvictionPolicy,
    now: Timestamp,
) -> EvictionReport {
    sweep_store(store, decay, policy, now, None)
}

/// Run one sweep that never removes `spared`.
///
/// When `spared` is present it keeps one of the `max_records` slots, so the
/// weakest of the other records make room for it.
pub fn evict_sparing(
    store: &dyn RecordStore,
    decay: &DecayManager,
    policy: &EvictionPolicy,
    now: Timestamp,
    spared: MemoryId,
) -> EvictionReport {
    sweep_store(store, decay, policy, now, Some(spared))
}

fn sweep_store(
    store: &dyn RecordStore,
    decay: &DecayManager,
    policy: &EvictionPolicy,
    now: Timestamp,
    spared: Option<MemoryId>,
) -> EvictionReport {
    let mut below_floor = 0;
    let removed = store.remove_where(&mut |view: &[MemoryRecord]| {
        let (ids, below) = match spared.filter(|id| view.iter().any(|r| r.id == *id)) {
            None => select_evictions(view, now, decay, policy),
            Some(keep) => {
                let others: Vec<MemoryRecord> = view.iter().filter(|r| r.id != keep).cloned().collect();
                let narrowed = EvictionPolicy {
                    max_records: policy.max_records.map(|cap| cap.saturating_sub(1)),
                    ..*policy
                };
                select_evictions(&others, now, decay, &narrowed)
            }
        };
        below_floor = below;
        ids
    });

    let removed: Vec<MemoryId> = removed.into_iter().map(|r| r.id).collect();
    EvictionReport {
        over_capacity: removed.len().saturating_sub(below_floor),
        below_floor,
        remaining: store.len(),
        removed,
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Runs sweeps on demand, after inserts that cross the size threshold, and
/// on a schedule.
pub struct Evictor {
    store: Arc<dyn RecordStore>,
    decay: DecayManager,
    policy: EvictionPolicy,
    clock: Arc<dyn Clock>,
    counters: Arc<RecallCounters>,
}

impl Evictor {
    /// Create an evictor over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        decay: DecayManager,
        policy: EvictionPolicy,
        clock: Arc<dyn Clock>,
        counters: Arc<RecallCounters>,
    ) -> Self {
        Self {
            store,
            decay,
            policy,
            clock,
            counters,
        }
    }

    /// The policy this evictor enforces.
    #[must_use]
    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    /// Sweep now.
    pub fn sweep(&self) -> EvictionReport {
        let report = evict(self.store.as_ref(), &self.decay, &self.policy, self.clock.now());
        self.record(report)
    }

    fn record(&self, report: EvictionReport) -> EvictionReport {
        RecallCounters::incr(&self.counters.sweeps);
        RecallCounters::add(&self.counters.evicted, report.removed.len() as u64);

        if report.removed.is_empty() {
            debug!(remaining = report.remaining, "Eviction sweep removed nothing");
        } else {
            info!(
                removed = report.removed.len(),
                below_floor = report.below_floor,
                over_capacity = report.over_capacity,
                remaining = report.remaining,
                "Eviction sweep"
            );
        }
        report
    }

    /// Sweep only if the store has grown past `max_records`.
    pub fn sweep_if_over_capacity(&self) -> Option<EvictionReport> {
        let cap = self.policy.max_records?;
        (self.store.len() > cap).then(|| self.sweep())
    }

    /// The post-insert sweep: like [`Evictor::sweep_if_over_capacity`], but
    /// the record just inserted is never among the victims.
    pub fn sweep_after_insert(&self, inserted: MemoryId) -> Option<EvictionReport> {
        let cap = self.policy.max_records?;
        if self.store.len() <= cap {
            return None;
        }
        let report = evict_sparing(
            self.store.as_ref(),
            &self.decay,
            &self.policy,
            self.clock.now(),
            inserted,
        );
        Some(self.record(report))
    }

    /// Spawn a background task sweeping every `interval`.
    ///
    /// The first sweep happens one full interval after spawning. Abort the
    /// returned handle to stop it.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DecayConfig;
    use crate::store::MemoryStore;
    use crate::types::{Embedding, ImportanceBounds, NewMemory};

    fn decay(half_life_secs: f64) -> DecayManager {
        DecayManager::new(
            &DecayConfig {
                half_life_secs,
                reinforcement_beta: 0.0,
            },
            ImportanceBounds::default(),
        )
    }

    fn insert(store: &MemoryStore, importance: f32, at: u64) -> MemoryId {
        store
            .insert(NewMemory {
                embedding: Embedding(vec![1.0, 0.0]),
                content: format!("memory at {at}"),
                base_importance: importance,
                created_at: Timestamp::from_secs(at),
                source: None,
            })
            .expect("insert")
    }

    #[test]
    fn removes_records_below_floor() {
        let store = MemoryStore::new(2, ImportanceBounds::default());
        let weak = insert(&store, 0.1, 0);
        let strong = insert(&store, 0.9, 0);
        let policy = EvictionPolicy { floor: 0.2, max_records: None };

        let report = evict(&store, &decay(10.0), &policy, Timestamp::from_secs(10));
        // weak: 0.5 × 0.1 = 0.05 < 0.2; strong: 0.5 × 0.9 = 0.45
        assert_eq!(report.removed, vec![weak]);
        assert_eq!(report.below_floor, 1);
        assert!(store.get(strong).is_some());
    }

    #[test]
    fn ties_are_evicted_oldest_first() {
        let store = MemoryStore::new(2, ImportanceBounds::default());
        let newer = insert(&store, 0.5, 100);
        let older = insert(&store, 0.5, 50);
        // Same last access for both so retention ties exactly.
        store.touch(newer, Timestamp::from_secs(200));
        store.touch(older, Timestamp::from_secs(200));
        let policy = EvictionPolicy { floor: 0.0, max_records: Some(1) };

        let report = evict(&store, &decay(10.0), &policy, Timestamp::from_secs(300));
        assert_eq!(report.removed, vec![older]);
        assert_eq!(report.over_capacity, 1);
        assert_eq!(report.remaining, 1);
    }

    #[test]
    fn capacity_trims_weakest_survivors() {
        let store = MemoryStore::new(2, ImportanceBounds::default());
        let ids: Vec<_> = [0.2, 0.8, 0.4, 0.6]
            .into_iter()
            .map(|imp| insert(&store, imp, 0))
            .collect();
        let policy = EvictionPolicy { floor: 0.0, max_records: Some(2) };

        let report = evict(&store, &decay(10.0), &policy, Timestamp::EPOCH);
        assert_eq!(report.removed, vec![ids[0], ids[2]]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn nothing_to_do_on_healthy_store() {
        let store = MemoryStore::new(2, ImportanceBounds::default());
        insert(&store, 0.9, 0);
        let policy = EvictionPolicy { floor: 0.05, max_records: Some(10) };
        let report = evict(&store, &decay(3600.0), &policy, Timestamp::from_secs(1));
        assert!(report.removed.is_empty());
        assert_eq!(report.remaining, 1);
    }

    #[test]
    fn touch_after_eviction_is_safe() {
        let store = MemoryStore::new(2, ImportanceBounds::default());
        let id = insert(&store, 0.1, 0);
        let policy = EvictionPolicy { floor: 1.0, max_records: None };
        evict(&store, &decay(10.0), &policy, Timestamp::from_secs(10));
        assert!(!store.touch(id, Timestamp::from_secs(11)));
    }

    #[test]
    fn evictor_counts_sweeps_and_removals() {
        let store = Arc::new(MemoryStore::new(2, ImportanceBounds::default()));
        for i in 0..4 {
            insert(&store, 0.5, i);
        }
        let counters = Arc::new(RecallCounters::new());
        let evictor = Evictor::new(
            store.clone(),
            decay(10.0),
            EvictionPolicy { floor: 0.0, max_records: Some(3) },
            Arc::new(ManualClock::new(Timestamp::from_secs(10))),
            counters.clone(),
        );

        let report = evictor.sweep_if_over_capacity().expect("over capacity");
        assert_eq!(report.removed.len(), 1);
        assert!(evictor.sweep_if_over_capacity().is_none());
        let snap = counters.snapshot();
        assert_eq!(snap.sweeps, 1);
        assert_eq!(snap.evicted, 1);
    }

    #[test]
    fn sparing_sweep_keeps_the_fresh_record() {
        let store = MemoryStore::new(2, ImportanceBounds::default());
        let strong = insert(&store, 0.9, 0);
        let middling = insert(&store, 0.5, 0);
        let fresh = insert(&store, 0.0, 0);
        let policy = EvictionPolicy { floor: 0.1, max_records: Some(2) };

        let report = evict_sparing(&store, &decay(10.0), &policy, Timestamp::EPOCH, fresh);
        // fresh has zero retention but is spared; middling makes room.
        assert_eq!(report.removed, vec![middling]);
        assert_eq!(report.below_floor, 0);
        assert!(store.get(fresh).is_some());
        assert!(store.get(strong).is_some());
    }

    #[test]
    fn sweep_after_insert_spares_weak_newcomer() {
        let store = Arc::new(MemoryStore::new(2, ImportanceBounds::default()));
        insert(&store, 0.6, 0);
        insert(&store, 0.7, 0);
        let newcomer = insert(&store, 0.05, 0);
        let counters = Arc::new(RecallCounters::new());
        let evictor = Evictor::new(
            store.clone(),
            decay(10.0),
            EvictionPolicy { floor: 0.0, max_records: Some(2) },
            Arc::new(ManualClock::new(Timestamp::EPOCH)),
            counters.clone(),
        );

        let report = evictor.sweep_after_insert(newcomer).expect("over capacity");
        assert_eq!(report.removed.len(), 1);
        assert!(!report.removed.contains(&newcomer));
        assert_eq!(store.len(), 2);
        assert_eq!(counters.snapshot().evicted, 1);
        assert!(evictor.sweep_after_insert(newcomer).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_sweeps_run_on_interval() {
        let store = Arc::new(MemoryStore::new(2, ImportanceBounds::default()));
        insert(&store, 0.1, 0);
        let counters = Arc::new(RecallCounters::new());
        let evictor = Arc::new(Evictor::new(
            store.clone(),
            decay(1.0),
            EvictionPolicy { floor: 0.05, max_records: None },
            Arc::new(ManualClock::new(Timestamp::from_secs(3600))),
            counters.clone(),
        ));

        let handle = evictor.spawn(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        handle.abort();

        assert!(store.is_empty());
        assert!(counters.snapshot().sweeps >= 1);
    }
}
