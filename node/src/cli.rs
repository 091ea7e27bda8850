//! # CLI Interface
//!
//! Defines the command-line argument structure for `warden-node` using
//! `clap` derive. Supports three subcommands: `run`, `verify`, and
//! `version`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use warden_protocol::config::{
    DEFAULT_API_PORT, DEFAULT_METRICS_PORT, DEFAULT_PROPOSAL_EXPIRY_SECS, MAX_OWNERS,
};
use warden_protocol::{authorization, EngineConfig};

use crate::logging::{LogFormat, DEFAULT_FILTER};

/// Warden vault engine node.
///
/// Hosts a multi-owner vault engine behind a REST/WebSocket API, persists
/// every commit to a hash-chained journal, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "warden-node",
    about = "Warden multi-party vault engine",
    version,
    propagate_version = true
)]
pub struct WardenCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the Warden node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the engine and serve the API.
    Run(RunArgs),
    /// Replay a data directory's event journal offline and report whether
    /// it matches the stored state.
    Verify(VerifyArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the sled database.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "WARDEN_DATA_DIR", default_value = "./warden-data")]
    pub data_dir: PathBuf,

    /// Keep all state in memory and discard it on shutdown.
    #[arg(long)]
    pub ephemeral: bool,

    /// Port for the REST and WebSocket API.
    #[arg(long, env = "WARDEN_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "WARDEN_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Lifetime of a proposal whose creator does not request one.
    #[arg(long, env = "WARDEN_DEFAULT_EXPIRY_SECS", default_value_t = DEFAULT_PROPOSAL_EXPIRY_SECS)]
    pub default_expiry_secs: i64,

    /// Upper bound on owners per vault.
    #[arg(long, env = "WARDEN_MAX_OWNERS", default_value_t = MAX_OWNERS)]
    pub max_owners: usize,

    /// Log output format.
    #[arg(long, env = "WARDEN_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// `tracing` filter directives. `RUST_LOG` overrides this when set.
    #[arg(long, env = "WARDEN_LOG_FILTER", default_value = DEFAULT_FILTER)]
    pub log_filter: String,
}

impl RunArgs {
    /// Engine parameters derived from the command line.
    ///
    /// Fails if `--default-expiry-secs` is outside `1..=max_expiry`.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let config = EngineConfig::default().with_max_owners(self.max_owners);
        let default_expiry = authorization::lifetime_from_secs(&config, self.default_expiry_secs)
            .context("invalid --default-expiry-secs")?;
        Ok(config.with_default_expiry(default_expiry))
    }
}

/// Arguments for the `verify` subcommand.
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Data directory to verify. The node must not be running against it.
    #[arg(long, short = 'd', env = "WARDEN_DATA_DIR", default_value = "./warden-data")]
    pub data_dir: PathBuf,
}
