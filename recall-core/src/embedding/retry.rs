//! Bounded exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Fraction of the base delay added as random jitter (upper bound).
const JITTER_FRACTION: f64 = 0.1;

/// How many times to call the provider and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    /// Growth factor per retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Build from the `[embedding.retry]` section.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    #[must_use]
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Delay before retry number `retry`.
    ///
    /// A provider hint replaces the computed backoff; either way the
    /// result never exceeds `max_delay`.
    #[must_use]
    pub fn delay_for(&self, retry: u32, retry_after_ms: Option<u64>) -> Duration {
        let delay = match retry_after_ms {
            Some(hint) => Duration::from_millis(hint),
            None => {
                let base = self.base_delay(retry);
                let jitter = rand::thread_rng().gen_range(0.0..=JITTER_FRACTION);
                base + base.mul_f64(jitter)
            }
        };
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
