//! Recency decay and reinforced importance.
//!
//! Recency follows an exponential half-life curve:
//!   R = e^(-λ · Δt),  λ = ln 2 / half_life
//!
//! Where:
//!   Δt = seconds since the record was last returned by a query
//!   R  ∈ (0, 1], exactly 0.5 after one half-life
//!
//! Effective importance rewards retrieval frequency logarithmically:
//!   I = clamp(base · (1 + β · ln(1 + access_count)), min, max)
//!
//! With β = 0 (the default) importance is static.

use crate::config::{DecayConfig, RecallConfig};
use crate::types::{ImportanceBounds, MemoryRecord, Timestamp};

/// λ for a given half-life in seconds.
#[must_use]
pub fn decay_lambda(half_life_secs: f64) -> f64 {
    std::f64::consts::LN_2 / half_life_secs
}

/// Core exponential curve: e^(-λ · Δt). Negative elapsed time counts as 0.
#[must_use]
pub fn exponential_decay(elapsed_secs: f64, lambda: f64) -> f64 {
    (-lambda * elapsed_secs.max(0.0)).exp()
}

/// base · (1 + β · ln(1 + n)), clamped into `bounds`.
#[must_use]
pub fn reinforced_importance(
    base_importance: f32,
    access_count: u32,
    beta: f64,
    bounds: ImportanceBounds,
) -> f64 {
    let rehearsal = 1.0 + beta * f64::from(access_count).ln_1p();
    bounds.clamp(f64::from(base_importance) * rehearsal)
}

/// Computes time-adjusted signals for records at query time.
#[derive(Debug, Clone)]
pub struct DecayManager {
    half_life_secs: f64,
    lambda: f64,
    beta: f64,
    bounds: ImportanceBounds,
}

impl DecayManager {
    /// Build from the decay section and the store's importance bound.
    #[must_use]
    pub fn new(config: &DecayConfig, bounds: ImportanceBounds) -> Self {
        Self {
            half_life_secs: config.half_life_secs,
            lambda: decay_lambda(config.half_life_secs),
            beta: config.reinforcement_beta,
            bounds,
        }
    }

    /// Build from a full configuration.
    #[must_use]
    pub fn from_config(config: &RecallConfig) -> Self {
        Self::new(&config.decay, config.importance_bounds())
    }

    /// Configured half-life in seconds.
    #[must_use]
    pub fn half_life_secs(&self) -> f64 {
        self.half_life_secs
    }

    /// Importance bound in use.
    #[must_use]
    pub fn bounds(&self) -> ImportanceBounds {
        self.bounds
    }

    /// Recency of `record` at `now`, in (0, 1].
    #[must_use]
    pub fn recency_score(&self, record: &MemoryRecord, now: Timestamp) -> f64 {
        exponential_decay(now.secs_since(record.last_accessed_at), self.lambda)
    }

    /// Reinforced importance, within the importance bound.
    #[must_use]
    pub fn effective_importance(&self, record: &MemoryRecord) -> f64 {
        reinforced_importance(
            record.base_importance,
            record.access_count,
            self.beta,
            self.bounds,
        )
    }

    /// Effective importance mapped onto \[0, 1\].
    #[must_use]
    pub fn normalized_importance(&self, record: &MemoryRecord) -> f64 {
        self.bounds.normalize(self.effective_importance(record))
    }

    /// `recency × effective_importance`; what eviction compares to its floor.
    #[must_use]
    pub fn retention(&self, record: &MemoryRecord, now: Timestamp) -> f64 {
        self.recency_score(record, now) * self.effective_importance(record)
    }
}
