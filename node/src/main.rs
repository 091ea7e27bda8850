//! # Warden Node
//!
//! Entry point for the `warden-node` binary. Parses CLI arguments, initializes
//! logging and metrics, opens the vault engine, and serves the HTTP/WS API.
//!
//! The binary supports three subcommands:
//!
//! - `run`    : open (or create) the data directory and serve the API
//! - `verify` : replay a data directory's journal offline and report
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

use warden_protocol::config::{EVENT_SCHEMA_VERSION, PROTOCOL_VERSION};
use warden_protocol::{Projection, SystemClock, VaultDb, VaultEngine};

use cli::{Commands, WardenCli};
use logging::LogSettings;
use metrics::{BroadcastSink, NodeMetrics};

/// Broadcast channel capacity for live event streaming.
/// 256 is large enough to absorb short bursts without dropping events
/// for connected WebSocket clients.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = WardenCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Verify(args) => verify_journal(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Opens the engine and serves the API and metrics endpoints until a
/// shutdown signal arrives.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&LogSettings::for_run(&args))?;

    let config = args.engine_config()?;

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        ephemeral = args.ephemeral,
        default_expiry_secs = args.default_expiry_secs,
        max_owners = config.max_owners,
        "starting warden-node"
    );

    // --- Engine ---
    let engine = if args.ephemeral {
        tracing::warn!("running without persistence, state is lost on shutdown");
        VaultEngine::new(config, Arc::new(SystemClock))
    } else {
        let db = open_db(&args.data_dir)?;
        VaultEngine::open(db, config, Arc::new(SystemClock))
            .context("failed to restore engine state from the journal")?
    };
    let engine = Arc::new(engine);
    tracing::info!(
        vaults = engine.vault_count(),
        events = engine.event_count(),
        head = %engine.head_hash(),
        "engine ready"
    );

    // --- Metrics ---
    let node_metrics =
        Arc::new(NodeMetrics::new().context("failed to register prometheus metrics")?);
    node_metrics.vaults.set(engine.vault_count() as i64);
    if let Some(last) = engine.event_count().checked_sub(1) {
        node_metrics.journal_sequence.set(last as i64);
    }

    // --- Event broadcast ---
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    engine.add_sink(Arc::new(BroadcastSink::new(
        Arc::clone(&node_metrics),
        event_tx.clone(),
    )));

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            PROTOCOL_VERSION,
        ),
        engine,
        event_tx,
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    tracing::info!("warden-node stopped");
    Ok(())
}

/// Opens the sled database under `data_dir/db`, creating it if needed.
fn open_db(data_dir: &Path) -> Result<VaultDb> {
    let db_path = data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = VaultDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");
    Ok(db)
}

/// Replays the journal in `data_dir` and compares the result with the
/// stored state. Exits with an error if they disagree.
fn verify_journal(args: cli::VerifyArgs) -> Result<()> {
    logging::init_logging(&LogSettings::for_verify())?;

    let db_path = args.data_dir.join("db");
    if !db_path.exists() {
        bail!("no database at {}", db_path.display());
    }
    let db = VaultDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    let snapshot = db.load_snapshot().context("failed to load stored state")?;

    let projection =
        Projection::replay(&snapshot.events).context("event journal failed verification")?;
    projection
        .check_snapshot(&snapshot)
        .context("stored state does not match the replayed journal")?;

    let head = snapshot
        .events
        .last()
        .map(|r| r.hash.as_str())
        .unwrap_or(warden_protocol::events::GENESIS_HASH);
    println!("Journal verified.");
    println!("  Database   : {}", db_path.display());
    println!("  Events     : {}", snapshot.events.len());
    println!("  Head hash  : {}", head);
    println!("  Vaults     : {}", projection.vaults.len());
    println!("  Proposals  : {}", projection.proposals.len());
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("warden-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol    {}", PROTOCOL_VERSION);
    println!("event schema v{}", EVENT_SCHEMA_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
