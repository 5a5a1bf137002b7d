//! voxrelay Relay Server
//!
//! WebSocket relay that fans document events out to sessions and routes
//! commands back.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use voxrelay_core::config::load_config;
use voxrelay_core::reconcile::{FinishPolicy, LinesSource};
use voxrelay_core::tracing_init::{default_filter, init_tracing};
use voxrelay_relay::liveness::spawn_liveness_sweeper;
use voxrelay_relay::pump::spawn_source_pump;
use voxrelay_relay::registry::SessionRegistry;
use voxrelay_relay::router::Broker;
use voxrelay_relay::server::{AppState, build_router};
use voxrelay_relay::storage::{Journal, spawn_journal_writer};

#[derive(Parser, Debug)]
#[command(name = "voxrelay-relay")]
#[command(version, about = "voxrelay relay server - session broker and diff engine")]
struct Args {
    /// Path to a JSON settings file, layered over the global settings.
    #[arg(long, env = "VOXRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Dictation keyword that submits the current segment.
    #[arg(long)]
    trigger_keyword: Option<String>,

    /// What a finished generation does to content tracking.
    #[arg(long, value_enum)]
    finish_policy: Option<FinishPolicy>,

    /// Seconds of inbound silence before a session is disconnected.
    #[arg(long)]
    liveness_secs: Option<u64>,

    /// Journal file path.
    #[arg(long)]
    journal_path: Option<PathBuf>,

    /// Disable the journal.
    #[arg(long)]
    no_journal: bool,

    /// Read NDJSON document notifications from stdin and publish them to
    /// every session.
    #[arg(long)]
    stdin_source: bool,

    /// Log level (overridden by RUST_LOG).
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(keyword) = args.trigger_keyword {
        config.engine.trigger_keyword = keyword;
    }
    if let Some(policy) = args.finish_policy {
        config.engine.finish_policy = policy;
    }
    if let Some(secs) = args.liveness_secs {
        config.server.liveness_window_secs = secs;
    }
    if let Some(path) = args.journal_path {
        config.journal.path = Some(path);
    }
    if args.no_journal {
        config.journal.enabled = false;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    config.validate()?;

    init_tracing(
        &default_filter("voxrelay_relay", &config.log_level),
        args.log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.addr,
        trigger_keyword = %config.engine.trigger_keyword,
        "Starting voxrelay-relay"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut journal_writer = None;
    if config.journal.enabled {
        match config.journal.resolved_path() {
            Some(path) => match Journal::open(&path).await {
                Ok(journal) => {
                    journal_writer = Some(spawn_journal_writer(
                        journal,
                        config.journal.queue_capacity,
                        shutdown_rx.clone(),
                    ));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Journal unavailable, continuing without it");
                }
            },
            None => warn!("Cannot determine journal path, continuing without it"),
        }
    }
    let (journal_handle, journal_task) = journal_writer.unzip();

    let registry = SessionRegistry::new(config.server.outbound_capacity);
    let broker = Arc::new(Broker::new(registry.clone(), journal_handle));

    let sweeper = spawn_liveness_sweeper(
        registry,
        config.server.liveness_window(),
        shutdown_rx.clone(),
    );

    if args.stdin_source {
        let source = LinesSource::new(tokio::io::BufReader::new(tokio::io::stdin()));
        spawn_source_pump(
            Box::new(source),
            Arc::clone(&broker),
            config.engine.finish_policy,
        );
        info!("Reading document notifications from stdin");
    }

    let app = build_router(AppState {
        broker: Arc::clone(&broker),
        engine: config.engine.clone(),
        max_frame_bytes: config.server.max_frame_bytes,
    });

    let listener = tokio::net::TcpListener::bind(config.server.addr).await?;
    info!(addr = %config.server.addr, "Relay server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;
    if let Some(task) = journal_task {
        match task.await {
            Ok(journal) => info!(entries = journal.len(), "Journal flushed"),
            Err(e) => warn!(error = %e, "Journal writer did not stop cleanly"),
        }
    }

    let stats = broker.stats();
    info!(
        published = stats.published,
        delivered = stats.delivered,
        target_not_found = stats.target_not_found,
        transport_failures = stats.transport_failures,
        "Relay server stopped"
    );
    Ok(())
}
