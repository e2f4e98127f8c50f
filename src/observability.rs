//! Tracing subscriber setup and the lifecycle events both binaries emit.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::settlement::RunSummary;
use crate::storage::MasterLogSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
        })
    }
}

/// Built by `logging_config_from_env` in the config module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive such as `info` or `tipledger=debug,info`.
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("invalid log filter '{directive}': {message}")]
    InvalidFilter { directive: String, message: String },
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingInitError> {
    EnvFilter::try_new(&config.level).map_err(|err| LoggingInitError::InvalidFilter {
        directive: config.level.clone(),
        message: err.to_string(),
    })
}

/// Installs the global subscriber. A bad filter directive is an error.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config)?)
        .with_target(config.include_target);

    match config.format {
        LogFormat::Json => {
            tracing::subscriber::set_global_default(builder.with_ansi(false).json().finish())?
        }
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(component: &'static str, config: &LoggingConfig) {
    info!(
        component,
        event = "app.start",
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        log_format = %config.format
    );
}

pub fn log_source_selected(source: &dyn MasterLogSource, refresh_interval_ms: u64) {
    info!(
        component = "report_server",
        event = "source.selected",
        source = source.kind(),
        location = %source.describe(),
        refresh_interval_ms
    );
}

pub fn log_app_bind(bound_addr: SocketAddr, routes: &[&str]) {
    info!(
        component = "report_server",
        event = "app.bind",
        bind_addr = %bound_addr,
        routes = %routes.join(",")
    );
}

/// One line per settled day; a day with tips but no matched results is flagged.
pub fn log_settle_summary(summary: &RunSummary) {
    info!(
        component = "settle",
        event = "settle.summary",
        date = %summary.date,
        tips = summary.tips_loaded,
        matched = summary.matched,
        no_result = summary.no_result,
        profit = summary.profit,
        profit_best = summary.profit_best,
        rows_replaced = summary.merge.rows_replaced,
        legacy_rows_dropped = summary.merge.legacy_rows_dropped,
        total_rows = summary.merge.total_rows,
        master_log_written = summary.master_log_written
    );
    if summary.tips_loaded > 0 && summary.matched == 0 {
        warn!(
            component = "settle",
            event = "settle.summary.unmatched_day",
            date = %summary.date,
            tips = summary.tips_loaded
        );
    }
}
