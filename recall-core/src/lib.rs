//! # Recall Core Library
//!
//! Hybrid memory retrieval: records of past events are stored with a text
//! embedding, and a query returns the most relevant subset by combining
//!
//! - **Semantic similarity**: cosine similarity to the query embedding
//! - **Recency**: exponential half-life decay since the last retrieval
//! - **Importance**: caller-supplied salience, optionally reinforced by
//!   how often the record has been retrieved
//!
//! ## Layout
//!
//! - [`store`]: the [`RecordStore`] contract and the in-memory [`MemoryStore`]
//! - [`decay`] and [`eviction`]: time-adjusted signals and score-based removal
//! - [`retrieval`]: the [`RankingEngine`]
//! - [`embedding`]: the [`EmbeddingProvider`] contract and the
//!   bounded/retrying [`EmbeddingGateway`]
//! - [`events`]: request/result shapes and the [`EventGateway`] adapter
//! - [`narrative`]: the two-tier [`NarrativeLog`] of stream moments and
//!   the [`Summarizer`] contract that fills it
//! - [`persistence`]: SQLite snapshots of a [`MemoryStore`] and its
//!   narrative log

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod decay;
pub mod embedding;
pub mod error;
pub mod events;
pub mod eviction;
pub mod metrics;
pub mod narrative;
pub mod persistence;
pub mod retrieval;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RecallConfig;
pub use decay::DecayManager;
pub use embedding::{EmbeddingError, EmbeddingGateway, EmbeddingProvider, HashEmbeddingProvider};
pub use error::RecallError;
pub use events::{EventGateway, InboundRequest, OutboundEvent, ResultSink};
pub use narrative::{NarrativeLog, Narrator, StreamEvent, Summarizer};
pub use retrieval::{RankQuery, RankedMemory, RankingEngine};
pub use store::{MemoryStore, RecordStore};
pub use types::*;
