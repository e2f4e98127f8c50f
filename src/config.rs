//! Explicit configuration structs. Environment access is confined to the `*_from_env` functions.

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::observability::{LogFormat, LoggingConfig};
use crate::settlement::DEFAULT_STAKE;

pub const DEFAULT_AWS_REGION: &str = "eu-west-2";

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementConfig {
    pub tips_dir: PathBuf,
    pub results_dir: PathBuf,
    pub master_log_path: PathBuf,
    pub stake: f64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            tips_dir: PathBuf::from("logs"),
            results_dir: PathBuf::from("rpscrape/data/dates/all"),
            master_log_path: PathBuf::from("logs/master_subscriber_log.csv"),
            stake: DEFAULT_STAKE,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub bucket: String,
    pub key: String,
    pub region: String,
    pub credentials: AwsCredentials,
    /// Overrides the virtual-hosted AWS endpoint, e.g. for S3-compatible stores.
    pub endpoint: Option<String>,
    pub http_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportServerConfig {
    pub addr: SocketAddr,
    pub refresh_interval_ms: u64,
    pub local_log_path: PathBuf,
    pub tips_dir: PathBuf,
    pub roi_stats_path: PathBuf,
    pub roi_window_days: i64,
    pub confidence_cache_capacity: usize,
    pub predictions_dir: PathBuf,
}

impl Default for ReportServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            refresh_interval_ms: 300_000,
            local_log_path: PathBuf::from("logs/master_subscriber_log.csv"),
            tips_dir: PathBuf::from("logs"),
            roi_stats_path: PathBuf::from("monster_confidence_per_day_with_roi.csv"),
            roi_window_days: 30,
            confidence_cache_capacity: 64,
            predictions_dir: PathBuf::from("predictions"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },
}

pub fn settlement_config_from_env() -> Result<SettlementConfig, ConfigError> {
    let mut config = SettlementConfig::default();

    if let Some(dir) = non_empty_var("TIPLEDGER_TIPS_DIR") {
        config.tips_dir = PathBuf::from(dir);
    }
    if let Some(dir) = non_empty_var("TIPLEDGER_RESULTS_DIR") {
        config.results_dir = PathBuf::from(dir);
    }
    if let Some(path) = non_empty_var("TIPLEDGER_MASTER_LOG") {
        config.master_log_path = PathBuf::from(path);
    }
    if let Some(raw) = non_empty_var("TIPLEDGER_STAKE") {
        config.stake = raw
            .parse::<f64>()
            .ok()
            .filter(|stake| stake.is_finite() && *stake > 0.0)
            .ok_or(ConfigError::Invalid {
                name: "TIPLEDGER_STAKE",
                value: raw,
            })?;
    }

    Ok(config)
}

/// Returns `Ok(None)` when no bucket is configured, meaning the local log should be used.
pub fn storage_config_from_env() -> Result<Option<StorageConfig>, ConfigError> {
    let Some(bucket) = non_empty_var("S3_BUCKET") else {
        return Ok(None);
    };
    let key = non_empty_var("S3_OBJECT").ok_or(ConfigError::Missing("S3_OBJECT"))?;
    let access_key_id =
        non_empty_var("AWS_ACCESS_KEY_ID").ok_or(ConfigError::Missing("AWS_ACCESS_KEY_ID"))?;
    let secret_access_key = non_empty_var("AWS_SECRET_ACCESS_KEY")
        .ok_or(ConfigError::Missing("AWS_SECRET_ACCESS_KEY"))?;

    Ok(Some(StorageConfig {
        bucket,
        key,
        region: non_empty_var("AWS_DEFAULT_REGION")
            .unwrap_or_else(|| DEFAULT_AWS_REGION.to_string()),
        credentials: AwsCredentials {
            access_key_id,
            secret_access_key,
            session_token: non_empty_var("AWS_SESSION_TOKEN"),
        },
        endpoint: non_empty_var("S3_ENDPOINT"),
        http_timeout_ms: 15_000,
    }))
}

pub fn report_server_config_from_env() -> Result<ReportServerConfig, ConfigError> {
    let mut config = ReportServerConfig::default();

    if let Some(raw) = non_empty_var("TIPLEDGER_REPORT_ADDR") {
        config.addr = raw.parse().map_err(|_| ConfigError::Invalid {
            name: "TIPLEDGER_REPORT_ADDR",
            value: raw.clone(),
        })?;
    }
    if let Some(raw) = non_empty_var("TIPLEDGER_REPORT_REFRESH_MS") {
        config.refresh_interval_ms = raw.parse().map_err(|_| ConfigError::Invalid {
            name: "TIPLEDGER_REPORT_REFRESH_MS",
            value: raw.clone(),
        })?;
    }
    if let Some(path) = non_empty_var("TIPLEDGER_MASTER_LOG") {
        config.local_log_path = PathBuf::from(path);
    }
    if let Some(dir) = non_empty_var("TIPLEDGER_TIPS_DIR") {
        config.tips_dir = PathBuf::from(dir);
    }
    if let Some(path) = non_empty_var("TIPLEDGER_ROI_STATS") {
        config.roi_stats_path = PathBuf::from(path);
    }
    if let Some(dir) = non_empty_var("TIPLEDGER_PREDICTIONS_DIR") {
        config.predictions_dir = PathBuf::from(dir);
    }

    Ok(config)
}

/// Logging settings from `TIPLEDGER_LOG_LEVEL`, `TIPLEDGER_LOG_FORMAT` and `TIPLEDGER_LOG_TARGET`.
/// Unrecognized values keep the defaults so a typo never stops a binary from starting.
pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Some(level) = non_empty_var("TIPLEDGER_LOG_LEVEL") {
        config.level = level;
    }
    if let Some(format) =
        non_empty_var("TIPLEDGER_LOG_FORMAT").and_then(|raw| raw.parse::<LogFormat>().ok())
    {
        config.format = format;
    }
    if let Some(include_target) = non_empty_var("TIPLEDGER_LOG_TARGET").and_then(|raw| {
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }) {
        config.include_target = include_target;
    }

    config
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
