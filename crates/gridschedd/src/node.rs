//! One grid server: scheduler, event sources, outcome writer and cache.
//!
//! Startup:
//! 1. Load and validate the configuration
//! 2. Restore the registry cache, if one is configured
//! 3. Spawn the dispatcher, the event reader, the maintenance tick and the
//!    outcome writer
//!
//! The node stops when the event stream ends (after draining it) or on
//! Ctrl-C. The registry cache is saved on the way out.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufRead, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use gridsched_core::{GridConfig, SystemClock};
use gridsched_scheduler::{Dispatcher, Outcome, Scheduler};
use gridsched_state::CacheStore;

use crate::events;

const CHANNEL_DEPTH: usize = 256;

pub struct NodeOptions {
    pub config: PathBuf,
    pub events: Option<PathBuf>,
    pub cache: Option<PathBuf>,
    pub tick: Duration,
}

/// Run the node until its event stream ends or Ctrl-C.
pub async fn run_node(opts: NodeOptions) -> anyhow::Result<()> {
    info!(config = ?opts.config, "grid scheduler starting");

    // ── Configuration ───────────────────────────────────────────
    let config = GridConfig::from_file(&opts.config)
        .with_context(|| format!("loading {}", opts.config.display()))?;
    let mut scheduler = Scheduler::new(config, Arc::new(SystemClock))?;
    info!(
        server_id = %scheduler.config().server_id(),
        algorithm = ?scheduler.algorithm(),
        peers = scheduler.config().peers.len(),
        "scheduler initialized"
    );

    // ── Registry cache ──────────────────────────────────────────
    let store = match &opts.cache {
        Some(path) => Some(open_cache(path)?),
        None => None,
    };
    if let Some(store) = &store {
        let cache = store.load_cache()?;
        if !cache.is_empty() {
            let expired = scheduler.set_cache(cache);
            info!(
                servers = scheduler.registry().servers().count(),
                resources = scheduler.registry().resources().count(),
                users = scheduler.registry().users().count(),
                expired = expired.len(),
                "registry cache restored"
            );
        }
    }

    // ── Channels ────────────────────────────────────────────────
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (outcome_tx, outcome_rx) = mpsc::channel(CHANNEL_DEPTH);
    // Stops the event sources.
    let (sources_tx, sources_rx) = watch::channel(false);
    // Stops the dispatcher without draining.
    let (stop_tx, stop_rx) = watch::channel(false);

    // ── Background tasks ────────────────────────────────────────
    let dispatch_handle = tokio::spawn(Dispatcher::new(scheduler).run(event_rx, outcome_tx, stop_rx));
    let writer_handle = tokio::spawn(write_outcomes(outcome_rx));
    let tick_handle = tokio::spawn(events::tick(opts.tick, event_tx.clone(), sources_rx.clone()));

    let source = open_source(opts.events.as_ref()).await?;
    let mut reader_handle = tokio::spawn(events::read_events(source, event_tx, sources_rx));

    // ── Wait for the end of input or a signal ───────────────────
    let reader_done = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("installing Ctrl-C handler")?;
            info!("shutdown signal received");
            let _ = stop_tx.send(true);
            false
        }
        res = &mut reader_handle => {
            match res {
                Ok(Ok(count)) => info!(count, "event stream drained"),
                Ok(Err(e)) => error!(error = %e, "event reader failed"),
                Err(e) => error!(error = %e, "event reader panicked"),
            }
            true
        }
    };

    let _ = sources_tx.send(true);
    if !reader_done {
        let _ = reader_handle.await;
    }
    let _ = tick_handle.await;

    // Senders are gone now, so the dispatcher finishes once the queue is
    // empty.
    let scheduler = dispatch_handle.await.context("dispatcher task")?;
    let _ = writer_handle.await;

    if let Some(store) = &store {
        store.save_cache(&scheduler.get_cache())?;
        info!("registry cache saved");
    }

    info!(queued = scheduler.queue().len(), "grid scheduler stopped");
    Ok(())
}

fn open_cache(path: &std::path::Path) -> anyhow::Result<CacheStore> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let store = CacheStore::open(path).with_context(|| format!("opening cache {}", path.display()))?;
    info!(path = ?path, "cache store opened");
    Ok(store)
}

async fn open_source(path: Option<&PathBuf>) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    Ok(match path {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening events {}", path.display()))?;
            info!(path = ?path, "reading events from file");
            Box::new(BufReader::new(file))
        }
        None => {
            info!("reading events from stdin");
            Box::new(BufReader::new(tokio::io::stdin()))
        }
    })
}

/// Print each outcome as one JSON line on stdout.
async fn write_outcomes(mut outcomes: mpsc::Receiver<Outcome>) {
    let mut stdout = tokio::io::stdout();
    while let Some(outcome) = outcomes.recv().await {
        let mut line = match serde_json::to_string(&outcome) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "failed to encode outcome");
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            error!(error = %e, "failed to write outcome");
            break;
        }
    }
    let _ = stdout.flush().await;
}
