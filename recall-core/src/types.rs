//! Core type definitions for the recall memory engine.
//!
//! Records are shared cheaply: the immutable parts (content, embedding)
//! live behind an `Arc`, the reinforcement counters are plain copies taken
//! at snapshot time.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Unique identifier for a memory record.
///
/// Allocated from a monotonically increasing counter owned by the store and
/// never reused, even after the record is evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(pub u64);

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Wall-clock instant in milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Self = Self(0);

    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Build from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Build from whole seconds since the epoch.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Convert a chrono timestamp. Instants before the epoch clamp to it.
    #[must_use]
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(u64::try_from(at.timestamp_millis()).unwrap_or(0))
    }

    /// Milliseconds since the epoch.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Seconds elapsed since `earlier`; zero if `earlier` is in the future.
    #[must_use]
    pub fn secs_since(self, earlier: Self) -> f64 {
        self.0.saturating_sub(earlier.0) as f64 / 1000.0
    }

    /// Convert back to a chrono timestamp.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let millis = i64::try_from(self.0).ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(at) => write!(f, "{}", at.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Embedding vector
// ---------------------------------------------------------------------------

/// A dense vector embedding for semantic similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    /// Cosine similarity in \[-1, 1\].
    ///
    /// Returns 0.0 when the lengths differ or either vector has zero
    /// magnitude. Accumulates in `f64` so self-similarity lands on 1.0.
    #[must_use]
    pub fn cosine_similarity(&self, other: &Self) -> f64 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return 0.0;
        }
        let (mut dot, mut norm_a, mut norm_b) = (0.0_f64, 0.0_f64, 0.0_f64);
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let (a, b) = (f64::from(*a), f64::from(*b));
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }
        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom < f64::EPSILON {
            0.0
        } else {
            (dot / denom).clamp(-1.0, 1.0)
        }
    }

    /// Dimensionality of the embedding.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    /// Whether every component is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|x| x.is_finite())
    }

    /// L2-normalise in place. Zero vectors are left untouched.
    pub fn normalize(&mut self) {
        let mag = self.0.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag > f32::EPSILON {
            for x in &mut self.0 {
                *x /= mag;
            }
        }
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

// ---------------------------------------------------------------------------
// Importance bound
// ---------------------------------------------------------------------------

/// Closed interval that `base_importance` and effective importance live in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImportanceBounds {
    /// Lower bound (inclusive).
    pub min: f32,
    /// Upper bound (inclusive).
    pub max: f32,
}

impl ImportanceBounds {
    /// Whether `value` is a number inside the bound.
    #[must_use]
    pub fn contains(&self, value: f32) -> bool {
        !value.is_nan() && value >= self.min && value <= self.max
    }

    /// Clamp `value` into the bound.
    #[must_use]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(f64::from(self.min), f64::from(self.max))
    }

    /// Map `value` from the bound onto \[0, 1\].
    #[must_use]
    pub fn normalize(&self, value: f64) -> f64 {
        let span = f64::from(self.max) - f64::from(self.min);
        if span <= f64::EPSILON {
            return 1.0;
        }
        ((self.clamp(value) - f64::from(self.min)) / span).clamp(0.0, 1.0)
    }
}

impl Default for ImportanceBounds {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A stored memory as seen by readers.
///
/// `content` and `embedding` never change after insertion; only
/// `last_accessed_at` and `access_count` move, and a `MemoryRecord` is a
/// point-in-time copy of those two.
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    /// Store-assigned identifier.
    pub id: MemoryId,
    /// Embedding produced on ingest.
    pub embedding: Arc<Embedding>,
    /// Opaque text payload returned to callers.
    pub content: Arc<str>,
    /// When the record was created (or the caller's context timestamp).
    pub created_at: Timestamp,
    /// Last time a query returned this record.
    pub last_accessed_at: Timestamp,
    /// Caller-supplied salience within the importance bound.
    pub base_importance: f32,
    /// Number of times a query returned this record.
    pub access_count: u32,
    /// Where the memory came from (e.g. `chat`, `microphone`), if known.
    pub source: Option<Arc<str>>,
}

/// Everything needed to create a record; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewMemory {
    /// Embedding of `content`.
    pub embedding: Embedding,
    /// Text payload.
    pub content: String,
    /// Initial salience.
    pub base_importance: f32,
    /// Creation time; also the initial `last_accessed_at`.
    pub created_at: Timestamp,
    /// Origin label, stored as given.
    pub source: Option<String>,
}
