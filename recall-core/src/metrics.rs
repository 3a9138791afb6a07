//! Runtime counters.
//!
//! Lock-free `AtomicU64` counters incremented on the hot path and read on
//! export. Every subsystem also emits `tracing` events; these counters are
//! the cheap aggregate view.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters for the engine.
#[derive(Debug)]
pub struct RecallCounters {
    /// Records saved.
    pub saves: AtomicU64,
    /// Save requests that failed.
    pub save_failures: AtomicU64,
    /// Query requests answered with results (possibly empty).
    pub queries: AtomicU64,
    /// Query requests that failed.
    pub query_failures: AtomicU64,
    /// Records returned across all queries.
    pub results_returned: AtomicU64,
    /// Provider calls made (including retries).
    pub embedding_calls: AtomicU64,
    /// Provider calls that were retries.
    pub embedding_retries: AtomicU64,
    /// Embedding requests that failed after retries.
    pub embedding_failures: AtomicU64,
    /// Requests rejected because no embedding slot became free.
    pub overloaded: AtomicU64,
    /// Requests answered from the embedding cache.
    pub cache_hits: AtomicU64,
    /// Records removed by eviction.
    pub evicted: AtomicU64,
    /// Eviction sweeps run.
    pub sweeps: AtomicU64,
}

impl RecallCounters {
    /// Create a new set of zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            saves: AtomicU64::new(0),
            save_failures: AtomicU64::new(0),
            queries: AtomicU64::new(0),
            query_failures: AtomicU64::new(0),
            results_returned: AtomicU64::new(0),
            embedding_calls: AtomicU64::new(0),
            embedding_retries: AtomicU64::new(0),
            embedding_failures: AtomicU64::new(0),
            overloaded: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            sweeps: AtomicU64::new(0),
        }
    }

    /// Increment a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment a counter by `n`.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            saves: load(&self.saves),
            save_failures: load(&self.save_failures),
            queries: load(&self.queries),
            query_failures: load(&self.query_failures),
            results_returned: load(&self.results_returned),
            embedding_calls: load(&self.embedding_calls),
            embedding_retries: load(&self.embedding_retries),
            embedding_failures: load(&self.embedding_failures),
            overloaded: load(&self.overloaded),
            cache_hits: load(&self.cache_hits),
            evicted: load(&self.evicted),
            sweeps: load(&self.sweeps),
        }
    }
}

impl Default for RecallCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of counter values at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Records saved.
    pub saves: u64,
    /// Failed saves.
    pub save_failures: u64,
    /// Answered queries.
    pub queries: u64,
    /// Failed queries.
    pub query_failures: u64,
    /// Records returned.
    pub results_returned: u64,
    /// Provider calls.
    pub embedding_calls: u64,
    /// Provider retries.
    pub embedding_retries: u64,
    /// Embedding failures after retries.
    pub embedding_failures: u64,
    /// Overload rejections.
    pub overloaded: u64,
    /// Embedding cache hits.
    pub cache_hits: u64,
    /// Evicted records.
    pub evicted: u64,
    /// Eviction sweeps.
    pub sweeps: u64,
}

impl CounterSnapshot {
    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let rows: [(&str, &str, u64); 12] = [
            ("recall_saves_total", "Records saved", self.saves),
            ("recall_save_failures_total", "Save requests that failed", self.save_failures),
            ("recall_queries_total", "Queries answered", self.queries),
            ("recall_query_failures_total", "Queries that failed", self.query_failures),
            ("recall_results_returned_total", "Records returned by queries", self.results_returned),
            ("recall_embedding_calls_total", "Embedding provider calls", self.embedding_calls),
            ("recall_embedding_retries_total", "Embedding provider retries", self.embedding_retries),
            ("recall_embedding_failures_total", "Embedding requests failed after retries", self.embedding_failures),
            ("recall_overloaded_total", "Requests rejected for lack of an embedding slot", self.overloaded),
            ("recall_embedding_cache_hits_total", "Embedding cache hits", self.cache_hits),
            ("recall_evicted_total", "Records evicted", self.evicted),
            ("recall_eviction_sweeps_total", "Eviction sweeps run", self.sweeps),
        ];

        let mut out = String::new();
        for (name, help, value) in rows {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        }
        out
    }
}
