//! recall - hybrid memory retrieval over a JSON-lines channel.
//!
//! Usage:
//!   recall [CONFIG.toml]
//!
//! Requests are read from stdin and events written to stdout, one JSON
//! object per line. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use recall_core::narrative::Narrator;
use recall_core::{EventGateway, RecallConfig, RecordStore, SystemClock};
use recall_service::{Services, init_tracing, open_narrative, open_store, persist_on_exit, run_lines};
use tokio::io::BufReader;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => RecallConfig::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RecallConfig::default(),
    };
    init_tracing(&config.general)?;
    info!(
        dims = config.store.embedding_dimensions,
        provider = %config.embedding.provider,
        summarizer = %config.narrative.summarizer,
        "Starting recall"
    );

    let store = Arc::new(open_store(&config)?);
    let log = Arc::new(open_narrative(&config)?);
    let provider = recall_embed::build_provider(&config).context("failed to build embedding provider")?;
    let summarizer = recall_embed::build_summarizer(&config).context("failed to build summarizer")?;
    let shared_store: Arc<dyn RecordStore> = store.clone();
    let gateway = Arc::new(EventGateway::new(
        &config,
        shared_store,
        provider,
        Arc::new(SystemClock),
    ));
    let narrator = Arc::new(Narrator::new(Arc::clone(&log), summarizer, &config.narrative));

    let sweeper = config.eviction.enabled.then(|| {
        Arc::clone(gateway.evictor()).spawn(Duration::from_secs(config.eviction.interval_secs))
    });

    let session = run_lines(
        Services {
            gateway: Arc::clone(&gateway),
            narrator,
        },
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    );
    let outcome = tokio::select! {
        summary = session => match summary {
            Ok(summary) => {
                info!(
                    dispatched = summary.dispatched,
                    commands = summary.commands,
                    rejected = summary.rejected,
                    "Input closed"
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Session failed");
                Err(e)
            }
        },
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
            Ok(())
        }
    };

    if let Some(handle) = sweeper {
        handle.abort();
    }

    let counters = gateway.counters().snapshot();
    info!(
        saves = counters.saves,
        queries = counters.queries,
        evicted = counters.evicted,
        records = store.len(),
        narrative = log.narrative_len(),
        ancient = log.ancient_len(),
        "Shutting down"
    );

    persist_on_exit(&config, &store, &log, outcome)
}
