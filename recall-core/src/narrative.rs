//! Narrative log: what happened recently, and what happened long ago.
//!
//! Batches of raw stream events (chat lines, speech, on-screen changes) are
//! condensed by a [`Summarizer`] into one short *moment*. Moments pile up in
//! the narrative tier; once it holds `history_threshold` of them the oldest
//! `history_chunk` are merged into a single *ancient history* entry.
//!
//! ```text
//! events ──▶ summarize_moment ──▶ clean ──▶ narrative [m1 m2 … m10]
//!                                                 │ oldest 5
//!                                                 ▼
//!                         summarize_history ──▶ clean ──▶ ancient [h1 …]
//! ```
//!
//! Summarizer output is free text and gets cleaned before it is kept:
//! preambles, wrapping quotes and trailing notes are stripped, and a reply
//! carrying [`SKIP_MARKER`] means "nothing worth keeping".
//!
//! [`ExtractiveSummarizer`] is the offline fallback; it needs no model and
//! answers instantly. The LLM-backed summarizer lives in `recall-embed`.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::NarrativeConfig;

/// A summarizer reply containing this means nothing was memorable.
pub const SKIP_MARKER: &str = "[SKIP]";

/// Leading phrases models like to put before the actual moment.
const MOMENT_PREAMBLES: &[&str] = &[
    "here is",
    "here's",
    "the memorable moment is",
    "memorable moment:",
    "one memorable moment",
];

const HISTORY_PREAMBLE: &str = "combined summary:";

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// One raw event from the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Input channel, e.g. `TWITCH_CHAT` or `MICROPHONE`.
    #[serde(default)]
    pub source: String,
    /// What was said or seen.
    #[serde(default)]
    pub text: String,
}

impl StreamEvent {
    /// Build an event.
    #[must_use]
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
        }
    }

    /// Human-readable label for the event's channel.
    #[must_use]
    pub fn label(&self) -> &'static str {
        source_label(&self.source)
    }
}

/// Map an input channel name to the label shown to a summarizer.
/// Unknown channels are plain `Event`s.
#[must_use]
pub fn source_label(source: &str) -> &'static str {
    match source.trim().to_ascii_uppercase().as_str() {
        "MICROPHONE" | "DIRECT_MICROPHONE" => "Streamer said",
        "TWITCH_CHAT" => "Chat",
        "TWITCH_MENTION" => "Chat mention",
        "VISUAL_CHANGE" => "On screen",
        "AMBIENT_AUDIO" => "Audio",
        _ => "Event",
    }
}

// ---------------------------------------------------------------------------
// Summarizer contract
// ---------------------------------------------------------------------------

/// Why a summarizer produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummarizeError {
    /// The backend could not be reached or failed.
    #[error("summarizer unavailable: {0}")]
    Unavailable(String),
    /// The backend answered with something that is not a summary.
    #[error("summarizer returned an unusable response: {0}")]
    BadResponse(String),
}

/// Turns events into moments and moments into history.
///
/// Implementations return raw text; [`Narrator`] cleans and filters it.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// One memorable moment from a non-empty batch of events, or a reply
    /// containing [`SKIP_MARKER`].
    async fn summarize_moment(&self, events: &[StreamEvent]) -> Result<String, SummarizeError>;

    /// One entry combining `moments`, oldest first.
    async fn summarize_history(&self, moments: &[String]) -> Result<String, SummarizeError>;

    /// Name for logs.
    fn name(&self) -> &str;
}

/// Rule-based summarizer that works offline.
///
/// A moment is the most substantial event of the batch under its channel
/// label; history is the moments joined in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveSummarizer;

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize_moment(&self, events: &[StreamEvent]) -> Result<String, SummarizeError> {
        // Longest text wins; the later event wins a tie.
        let best = events
            .iter()
            .filter(|e| !e.text.trim().is_empty())
            .max_by_key(|e| e.text.trim().chars().count());
        Ok(match best {
            Some(event) => format!("{}: {}", event.label(), event.text.trim()),
            None => SKIP_MARKER.to_string(),
        })
    }

    async fn summarize_history(&self, moments: &[String]) -> Result<String, SummarizeError> {
        Ok(format!("Earlier: {}", moments.join("; ")))
    }

    fn name(&self) -> &str {
        "extractive"
    }
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &text[prefix.len()..])
}

fn strip_quotes(text: &str) -> &str {
    text.trim_matches(|c| c == '"' || c == '\'')
}

/// Clean a raw moment. `None` if it should not be kept.
#[must_use]
pub fn clean_moment(raw: &str, min_chars: usize) -> Option<String> {
    let mut text = raw.trim();
    if text.is_empty() || text.to_ascii_uppercase().contains(SKIP_MARKER) {
        return None;
    }
    if let Some(rest) = MOMENT_PREAMBLES
        .iter()
        .find_map(|p| strip_prefix_ignore_case(text, p))
    {
        text = rest.trim_start_matches(':').trim();
    }
    text = strip_quotes(text);
    if let Some((head, _)) = text.split_once("\nNote:") {
        text = head.trim();
    }
    if strip_prefix_ignore_case(text, "note:").is_some() {
        return None;
    }
    (text.chars().count() > min_chars).then(|| text.to_string())
}

/// Clean a raw history entry. `None` if it should not be kept.
#[must_use]
pub fn clean_history(raw: &str, min_chars: usize) -> Option<String> {
    let mut text = raw.trim();
    if let Some(rest) = strip_prefix_ignore_case(text, HISTORY_PREAMBLE) {
        text = rest.trim();
    }
    text = strip_quotes(text);
    (text.chars().count() > min_chars).then(|| text.to_string())
}

// ---------------------------------------------------------------------------
// Log
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Tiers {
    narrative: VecDeque<String>,
    ancient: Vec<String>,
}

/// The two-tier log. Oldest entries first in both tiers.
#[derive(Debug, Default)]
pub struct NarrativeLog {
    tiers: Mutex<Tiers>,
}

impl NarrativeLog {
    /// An empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A log holding previously saved tiers.
    #[must_use]
    pub fn restore(narrative: Vec<String>, ancient: Vec<String>) -> Self {
        Self {
            tiers: Mutex::new(Tiers {
                narrative: narrative.into(),
                ancient,
            }),
        }
    }

    /// Append a moment. Returns the new narrative length.
    pub fn add_narrative(&self, text: impl Into<String>) -> usize {
        let mut tiers = self.tiers.lock();
        tiers.narrative.push_back(text.into());
        tiers.narrative.len()
    }

    /// Append a history entry. Returns the new ancient length.
    pub fn add_ancient(&self, text: impl Into<String>) -> usize {
        let mut tiers = self.tiers.lock();
        tiers.ancient.push(text.into());
        tiers.ancient.len()
    }

    /// Copy of the narrative tier.
    #[must_use]
    pub fn narrative(&self) -> Vec<String> {
        self.tiers.lock().narrative.iter().cloned().collect()
    }

    /// Copy of the ancient tier.
    #[must_use]
    pub fn ancient(&self) -> Vec<String> {
        self.tiers.lock().ancient.clone()
    }

    /// Number of moments.
    #[must_use]
    pub fn narrative_len(&self) -> usize {
        self.tiers.lock().narrative.len()
    }

    /// Number of history entries.
    #[must_use]
    pub fn ancient_len(&self) -> usize {
        self.tiers.lock().ancient.len()
    }

    /// Remove and return the oldest `count` moments, or nothing if fewer
    /// than `count` are present.
    pub fn pop_oldest(&self, count: usize) -> Vec<String> {
        self.pop_oldest_when(count, count)
    }

    /// Like [`NarrativeLog::pop_oldest`], but only once the tier holds at
    /// least `min_len` moments. Check and removal happen under one lock.
    pub fn pop_oldest_when(&self, min_len: usize, count: usize) -> Vec<String> {
        let mut tiers = self.tiers.lock();
        if count == 0 || tiers.narrative.len() < min_len.max(count) {
            return Vec::new();
        }
        tiers.narrative.drain(..count).collect()
    }

    /// Put moments taken by [`NarrativeLog::pop_oldest`] back in front.
    pub fn restore_oldest(&self, chunk: Vec<String>) {
        let mut tiers = self.tiers.lock();
        for text in chunk.into_iter().rev() {
            tiers.narrative.push_front(text);
        }
    }
}

// ---------------------------------------------------------------------------
// Narrator
// ---------------------------------------------------------------------------

/// Outcome of one [`Narrator::compress`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompressReport {
    /// A moment was added to the narrative tier.
    pub narrative_added: bool,
    /// A history entry was added to the ancient tier.
    pub ancient_added: bool,
}

/// Drives a [`Summarizer`] over a [`NarrativeLog`].
///
/// Summarizer failures are logged and reported as "nothing added"; they are
/// never returned to the caller.
pub struct Narrator {
    log: Arc<NarrativeLog>,
    summarizer: Arc<dyn Summarizer>,
    history_threshold: usize,
    history_chunk: usize,
    min_moment_chars: usize,
    min_history_chars: usize,
}

impl Narrator {
    /// Wire a narrator from the `[narrative]` section.
    #[must_use]
    pub fn new(log: Arc<NarrativeLog>, summarizer: Arc<dyn Summarizer>, config: &NarrativeConfig) -> Self {
        Self {
            log,
            summarizer,
            history_threshold: config.history_threshold,
            history_chunk: config.history_chunk,
            min_moment_chars: config.min_moment_chars,
            min_history_chars: config.min_history_chars,
        }
    }

    /// The log this narrator writes to.
    #[must_use]
    pub fn log(&self) -> &Arc<NarrativeLog> {
        &self.log
    }

    /// Condense `events` into one moment and append it. Returns whether a
    /// moment was added.
    pub async fn record_moment(&self, events: &[StreamEvent]) -> bool {
        if events.is_empty() {
            return false;
        }
        let raw = match self.summarizer.summarize_moment(events).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(summarizer = self.summarizer.name(), error = %e, "Moment summary failed");
                return false;
            }
        };
        let Some(moment) = clean_moment(&raw, self.min_moment_chars) else {
            debug!(events = events.len(), "Nothing memorable in batch");
            return false;
        };
        let len = self.log.add_narrative(moment);
        info!(events = events.len(), narrative = len, "Moment recorded");
        true
    }

    /// Merge the oldest moments into one history entry if the narrative
    /// tier has reached its threshold. Returns whether an entry was added.
    ///
    /// If the summarizer fails the moments go back where they were; an
    /// unusable summary drops them.
    pub async fn fold_history(&self) -> bool {
        let chunk = self.log.pop_oldest_when(self.history_threshold, self.history_chunk);
        if chunk.is_empty() {
            return false;
        }
        let raw = match self.summarizer.summarize_history(&chunk).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(summarizer = self.summarizer.name(), error = %e, "History summary failed");
                self.log.restore_oldest(chunk);
                return false;
            }
        };
        match clean_history(&raw, self.min_history_chars) {
            Some(entry) => {
                let len = self.log.add_ancient(entry);
                info!(merged = chunk.len(), ancient = len, "Moments archived");
                true
            }
            None => {
                warn!(merged = chunk.len(), "History summary unusable; moments dropped");
                false
            }
        }
    }

    /// Record a moment from `events`, then fold history if due.
    pub async fn compress(&self, events: &[StreamEvent]) -> CompressReport {
        let narrative_added = self.record_moment(events).await;
        let ancient_added = self.fold_history().await;
        CompressReport {
            narrative_added,
            ancient_added,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
