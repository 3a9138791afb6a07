//! # recall-service — JSON-lines front end for Recall
//!
//! Reads one JSON request per line, answers with one JSON event per line.
//! Requests are dispatched concurrently, so replies may arrive out of order;
//! correlate queries by `request_id`.
//!
//! ```text
//! stdin  ──▶ parse ──▶ EventGateway::dispatch (one task per request)
//!                 │            │
//!                 └─ command   ▼
//! stdout ◀── writer task ◀── LineSink (mpsc)
//! ```
//!
//! Besides `save_memory` and `query_memories` the channel accepts operator
//! commands:
//!
//! | command                                   | reply             |
//! |-------------------------------------------|-------------------|
//! | `{"type":"stats","top_n":5}`              | `stats`           |
//! | `{"type":"metrics"}`                      | `metrics`         |
//! | `{"type":"health"}`                       | `health`          |
//! | `{"type":"narrative_add","text":"..."}`   | `narrative_added` |
//! | `{"type":"narrative"}`                    | `narrative`       |
//! | `{"type":"ancient"}`                      | `ancient`         |
//! | `{"type":"compress","events":[...]}`      | `compressed`      |
//!
//! `compress` calls the summarizer and is answered asynchronously like a
//! request; the others are answered in line order.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use recall_core::config::{GeneralConfig, RecallConfig};
use recall_core::events::WireError;
use recall_core::metrics::RecallCounters;
use recall_core::narrative::{NarrativeLog, Narrator, StreamEvent};
use recall_core::persistence::SnapshotStore;
use recall_core::store::StoreStats;
use recall_core::{EventGateway, InboundRequest, MemoryStore, OutboundEvent, RecallError, RecordStore, ResultSink};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Records shown by a `stats` command without `top_n`.
const DEFAULT_STATS_TOP_N: usize = 5;

/// Name reported by `health`.
const SERVICE_NAME: &str = "recall";

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install the global subscriber. Logs go to stderr; stdout carries the
/// protocol. `RUST_LOG` overrides `general.log_level`.
///
/// # Errors
///
/// Invalid filter directives, or a subscriber that is already installed.
pub fn init_tracing(general: &GeneralConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&general.log_level))
        .with_context(|| format!("invalid log level '{}'", general.log_level))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if general.log_format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!(e))
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// The store to start with: restored from `persistence.path` when a
/// snapshot exists there, empty otherwise.
///
/// # Errors
///
/// Unreadable database, or a snapshot with different dimensionality.
pub fn open_store(config: &RecallConfig) -> anyhow::Result<MemoryStore> {
    let Some(path) = &config.persistence.path else {
        return Ok(MemoryStore::from_config(config));
    };
    let snapshots = SnapshotStore::open(path)
        .with_context(|| format!("failed to open snapshot database {}", path.display()))?;
    let restored = snapshots
        .load(config.store.embedding_dimensions, config.importance_bounds())
        .with_context(|| format!("failed to restore snapshot from {}", path.display()))?;
    Ok(match restored {
        Some(store) => {
            info!(path = %path.display(), records = store.len(), "Restored memory snapshot");
            store
        }
        None => MemoryStore::from_config(config),
    })
}

/// The narrative log to start with, restored like [`open_store`].
///
/// # Errors
///
/// Unreadable database.
pub fn open_narrative(config: &RecallConfig) -> anyhow::Result<NarrativeLog> {
    let Some(path) = &config.persistence.path else {
        return Ok(NarrativeLog::new());
    };
    let snapshots = SnapshotStore::open(path)
        .with_context(|| format!("failed to open snapshot database {}", path.display()))?;
    let log = snapshots
        .load_narrative()
        .with_context(|| format!("failed to restore narrative log from {}", path.display()))?;
    info!(
        path = %path.display(),
        narrative = log.narrative_len(),
        ancient = log.ancient_len(),
        "Restored narrative log"
    );
    Ok(log)
}

/// Write `store` to `path`, replacing the previous snapshot.
///
/// # Errors
///
/// Any database failure.
pub fn persist_store(path: &Path, store: &MemoryStore) -> anyhow::Result<usize> {
    let mut snapshots = SnapshotStore::open(path)
        .with_context(|| format!("failed to open snapshot database {}", path.display()))?;
    let saved = snapshots
        .save(store)
        .with_context(|| format!("failed to write snapshot to {}", path.display()))?;
    info!(path = %path.display(), records = saved, "Saved memory snapshot");
    Ok(saved)
}

/// Write `log` to `path`, replacing the previously saved log.
///
/// # Errors
///
/// Any database failure.
pub fn persist_narrative(path: &Path, log: &NarrativeLog) -> anyhow::Result<()> {
    let mut snapshots = SnapshotStore::open(path)
        .with_context(|| format!("failed to open snapshot database {}", path.display()))?;
    let (narrative, ancient) = snapshots
        .save_narrative(log)
        .with_context(|| format!("failed to write narrative log to {}", path.display()))?;
    info!(path = %path.display(), narrative, ancient, "Saved narrative log");
    Ok(())
}

/// Write the shutdown snapshot if configured, then hand back `outcome`.
///
/// The snapshot is written whether or not the session failed. A snapshot
/// failure is returned only when the session itself succeeded.
///
/// # Errors
///
/// The session's error, else any snapshot failure.
pub fn persist_on_exit<T>(
    config: &RecallConfig,
    store: &MemoryStore,
    log: &NarrativeLog,
    outcome: anyhow::Result<T>,
) -> anyhow::Result<T> {
    let persisted = match (&config.persistence.path, config.persistence.save_on_shutdown) {
        (Some(path), true) => persist_store(path, store).and_then(|_| persist_narrative(path, log)),
        _ => Ok(()),
    };
    match (outcome, persisted) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), persisted) => {
            if let Err(snapshot_err) = persisted {
                error!(error = %snapshot_err, "Shutdown snapshot failed");
            }
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Line protocol
// ---------------------------------------------------------------------------

/// Operator commands handled by the service itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Record count and strongest memories.
    Stats {
        /// How many records to list.
        #[serde(default)]
        top_n: Option<usize>,
    },
    /// Counter snapshot in Prometheus text format.
    Metrics,
    /// Liveness check.
    Health,
    /// Append a ready-made moment to the narrative tier.
    NarrativeAdd {
        /// The moment.
        text: String,
    },
    /// Current narrative tier.
    Narrative,
    /// Current ancient tier.
    Ancient,
    /// Summarize a batch of stream events into the narrative log.
    Compress {
        /// Echoed on the reply when present.
        #[serde(default)]
        request_id: Option<String>,
        /// The batch, oldest first.
        #[serde(default)]
        events: Vec<StreamEvent>,
    },
}

/// Events produced by the service rather than the gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceEvent {
    /// The line was not a valid request.
    RequestRejected {
        /// Why.
        error: WireError,
    },
    /// Reply to [`ControlCommand::Stats`].
    Stats {
        /// Record count and strongest memories.
        #[serde(flatten)]
        store: StoreStats,
        /// Moments in the narrative tier.
        narrative_count: usize,
        /// Entries in the ancient tier.
        ancient_count: usize,
    },
    /// Reply to [`ControlCommand::Metrics`].
    Metrics {
        /// Prometheus exposition text.
        text: String,
    },
    /// Reply to [`ControlCommand::Health`].
    Health {
        /// Always `ok` while the service reads input.
        status: &'static str,
        /// Service name.
        service: &'static str,
        /// Stored records.
        records: usize,
    },
    /// Reply to [`ControlCommand::NarrativeAdd`].
    NarrativeAdded {
        /// Narrative length after the append.
        narrative_count: usize,
    },
    /// Reply to [`ControlCommand::Narrative`].
    Narrative {
        /// Moments, oldest first.
        narrative: Vec<String>,
    },
    /// Reply to [`ControlCommand::Ancient`].
    Ancient {
        /// History entries, oldest first.
        ancient: Vec<String>,
    },
    /// Reply to [`ControlCommand::Compress`].
    Compressed {
        /// Correlation id of the command, if it carried one.
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        /// A moment was recorded.
        narrative_added: bool,
        /// Old moments were merged into history.
        ancient_added: bool,
        /// Narrative tier after the call.
        narrative: Vec<String>,
        /// Ancient tier after the call.
        ancient: Vec<String>,
    },
}

/// One parsed input line.
#[derive(Debug)]
pub enum Line {
    /// Gateway request.
    Request(InboundRequest),
    /// Operator command.
    Control(ControlCommand),
}

/// Parse one input line.
///
/// # Errors
///
/// [`RecallError::Serialization`] for anything that is neither a request
/// nor a control command.
pub fn parse_line(line: &str) -> Result<Line, RecallError> {
    match serde_json::from_str::<InboundRequest>(line) {
        Ok(request) => Ok(Line::Request(request)),
        Err(request_err) => serde_json::from_str::<ControlCommand>(line)
            .map(Line::Control)
            .map_err(|_| RecallError::Serialization(request_err.to_string())),
    }
}

/// The failure reply for a line that names a gateway request type but does
/// not parse as one, so callers waiting on a `request_id` still get an
/// answer. `None` for anything else.
///
/// A malformed query without a usable `request_id` gets a fresh one, as a
/// well-formed query would.
#[must_use]
pub fn malformed_request_reply(line: &str, err: &RecallError) -> Option<OutboundEvent> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let request_id = value
        .get("request_id")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);
    let error = WireError::from(err);
    match value.get("type").and_then(serde_json::Value::as_str)? {
        "query_memories" => Some(OutboundEvent::QueryFailed {
            request_id: request_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            error,
        }),
        "save_memory" => Some(OutboundEvent::SaveFailed { request_id, error }),
        _ => None,
    }
}

/// [`ResultSink`] that serialises events into output lines.
#[derive(Debug, Clone)]
pub struct LineSink {
    tx: mpsc::UnboundedSender<String>,
}

impl LineSink {
    fn send<T: Serialize>(&self, event: &T) {
        match serde_json::to_string(event) {
            Ok(line) => {
                if self.tx.send(line).is_err() {
                    debug!("Output closed; event discarded");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialise event"),
        }
    }
}

impl ResultSink for LineSink {
    fn emit(&self, event: OutboundEvent) {
        self.send(&event);
    }
}

/// What one session serves.
#[derive(Clone)]
pub struct Services {
    /// Memory requests.
    pub gateway: Arc<EventGateway>,
    /// Narrative commands.
    pub narrator: Arc<Narrator>,
}

/// Totals for one [`run_lines`] session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Requests handed to the gateway.
    pub dispatched: u64,
    /// Operator commands answered.
    pub commands: u64,
    /// Lines that could not be parsed.
    pub rejected: u64,
}

/// Serve requests from `reader` until end of input, writing events to
/// `writer`. Returns after every dispatched request and command has
/// replied and the output has been flushed, also when reading fails.
///
/// Lines are read as raw bytes; one that is not UTF-8 is rejected like any
/// other malformed line.
///
/// # Errors
///
/// Read or write failures on the channel itself. Bad requests are answered,
/// not returned.
pub async fn run_lines<R, W>(services: Services, mut reader: R, writer: W) -> anyhow::Result<SessionSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_lines(rx, writer));
    let sink = LineSink { tx };
    let shared_sink: Arc<dyn ResultSink> = Arc::new(sink.clone());

    let mut summary = SessionSummary::default();
    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
    let mut buf = Vec::new();

    let read_result: anyhow::Result<()> = loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break Ok(()),
            Ok(_) => {}
            Err(e) => break Err(anyhow::Error::new(e).context("failed to read request")),
        }
        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                summary.rejected += 1;
                let err = RecallError::Serialization(format!("request line is not valid UTF-8: {e}"));
                warn!(error = %err, "Rejected malformed request line");
                sink.send(&ServiceEvent::RequestRejected {
                    error: WireError::from(&err),
                });
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        in_flight.retain(|h| !h.is_finished());

        match parse_line(line) {
            Ok(Line::Request(request)) => {
                summary.dispatched += 1;
                in_flight.push(services.gateway.dispatch(request, Arc::clone(&shared_sink)));
            }
            Ok(Line::Control(command)) => {
                summary.commands += 1;
                if let Some(handle) = answer_command(&services, command, &sink) {
                    in_flight.push(handle);
                }
            }
            Err(err) => {
                summary.rejected += 1;
                warn!(error = %err, "Rejected malformed request line");
                match malformed_request_reply(line, &err) {
                    Some(reply) => {
                        if matches!(reply, OutboundEvent::QueryFailed { .. }) {
                            RecallCounters::incr(&services.gateway.counters().query_failures);
                        } else {
                            RecallCounters::incr(&services.gateway.counters().save_failures);
                        }
                        sink.emit(reply);
                    }
                    None => sink.send(&ServiceEvent::RequestRejected {
                        error: WireError::from(&err),
                    }),
                }
            }
        }
    };

    for handle in in_flight {
        if let Err(e) = handle.await {
            warn!(error = %e, "Request task ended abnormally");
        }
    }
    drop(shared_sink);
    drop(sink);
    writer_task.await.context("writer task panicked")??;
    read_result?;

    debug!(?summary, "Input closed");
    Ok(summary)
}

/// Answer `command`; returns a handle when the reply comes from a task.
fn answer_command(services: &Services, command: ControlCommand, sink: &LineSink) -> Option<JoinHandle<()>> {
    let log = services.narrator.log();
    match command {
        ControlCommand::Stats { top_n } => sink.send(&ServiceEvent::Stats {
            store: services.gateway.stats(top_n.unwrap_or(DEFAULT_STATS_TOP_N)),
            narrative_count: log.narrative_len(),
            ancient_count: log.ancient_len(),
        }),
        ControlCommand::Metrics => sink.send(&ServiceEvent::Metrics {
            text: services.gateway.counters().snapshot().to_prometheus(),
        }),
        ControlCommand::Health => sink.send(&ServiceEvent::Health {
            status: "ok",
            service: SERVICE_NAME,
            records: services.gateway.store().len(),
        }),
        ControlCommand::NarrativeAdd { text } => {
            let text = text.trim();
            if text.is_empty() {
                let err = RecallError::ContentRejected {
                    reason: "narrative text is empty".into(),
                };
                sink.send(&ServiceEvent::RequestRejected {
                    error: WireError::from(&err),
                });
            } else {
                let narrative_count = log.add_narrative(text);
                sink.send(&ServiceEvent::NarrativeAdded { narrative_count });
            }
        }
        ControlCommand::Narrative => sink.send(&ServiceEvent::Narrative {
            narrative: log.narrative(),
        }),
        ControlCommand::Ancient => sink.send(&ServiceEvent::Ancient { ancient: log.ancient() }),
        ControlCommand::Compress { request_id, events } => {
            let narrator = Arc::clone(&services.narrator);
            let sink = sink.clone();
            return Some(tokio::spawn(async move {
                let report = narrator.compress(&events).await;
                sink.send(&ServiceEvent::Compressed {
                    request_id,
                    narrative_added: report.narrative_added,
                    ancient_added: report.ancient_added,
                    narrative: narrator.log().narrative(),
                    ancient: narrator.log().ancient(),
                });
            }));
        }
    }
    None
}

async fn write_lines<W>(mut rx: mpsc::UnboundedReceiver<String>, mut writer: W) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await.context("failed to write event")?;
        writer.write_all(b"\n").await.context("failed to write event")?;
        writer.flush().await.context("failed to flush output")?;
    }
    writer.shutdown().await.ok();
    Ok(())
}
