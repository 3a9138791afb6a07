//! Time source for ranking and eviction.
//!
//! Ranking is deterministic for a fixed clock value, so everything that
//! needs "now" asks a [`Clock`] instead of reading the wall clock directly.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::Timestamp;

/// Supplies the current time.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time via `chrono`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to. Used by tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Start at `at`.
    #[must_use]
    pub fn new(at: Timestamp) -> Self {
        Self {
            millis: AtomicU64::new(at.as_millis()),
        }
    }

    /// Jump to `at`.
    pub fn set(&self, at: Timestamp) {
        self.millis.store(at.as_millis(), Ordering::SeqCst);
    }

    /// Move forward by whole seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.millis.fetch_add(secs.saturating_mul(1000), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}
