//! # Structured Logging
//!
//! Sets up the `tracing` subscriber for the node. Output goes to stderr so
//! that stdout stays free for the `verify` report.
//!
//! The filter comes from `--log-filter` (`WARDEN_LOG_FILTER`); `RUST_LOG`
//! takes precedence when set. Engine events are logged under the
//! `warden_protocol` target, request handling under `warden_node` and
//! `tower_http`.

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::RunArgs;

/// Filter used by `run` when neither `--log-filter` nor `RUST_LOG` is given.
pub const DEFAULT_FILTER: &str = "warden_node=info,warden_protocol=info,tower_http=info";

/// Filter used by `verify`: only replay failures and storage warnings.
const VERIFY_FILTER: &str = "warden_node=warn,warden_protocol=warn";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable, colored output with source locations.
    Pretty,
    /// One JSON object per line, for log aggregation.
    Json,
}

/// What the subscriber should emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directives.
    pub filter: String,
    pub format: LogFormat,
}

impl LogSettings {
    /// Settings for a serving node.
    pub fn for_run(args: &RunArgs) -> Self {
        Self {
            filter: args.log_filter.clone(),
            format: args.log_format,
        }
    }

    /// Settings for the offline `verify` command.
    pub fn for_verify() -> Self {
        Self {
            filter: VERIFY_FILTER.to_string(),
            format: LogFormat::Pretty,
        }
    }

    /// Resolves the effective filter, preferring `RUST_LOG`.
    fn env_filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.filter)
            .with_context(|| format!("invalid log filter {:?}", self.filter))
    }
}

/// Installs the global subscriber. Call once, before the engine opens.
///
/// # Errors
///
/// Fails if the filter directives do not parse or a subscriber is already
/// installed.
pub fn init_logging(settings: &LogSettings) -> Result<()> {
    let env_filter = settings.env_filter()?;

    match settings.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(false)
                    .with_target(true),
            )
            .try_init(),
    }
    .context("failed to install the tracing subscriber")?;

    tracing::debug!(filter = %settings.filter, format = ?settings.format, "logging initialized");
    Ok(())
}
