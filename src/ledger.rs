//! Master subscriber log: CSV persistence and per-day merge.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::info;

/// Marker carried by rows from an old log format; such rows are purged on every write.
pub const LEGACY_DATE_MARKER: &str = "_realistic";

pub const MASTER_LOG_HEADERS: [&str; 17] = [
    "Date",
    "Meeting",
    "Time",
    "EW/Win",
    "Trainer",
    "Jockey",
    "Horse",
    "Odds",
    "SP",
    "Value",
    "Result",
    "Stake",
    "Profit",
    "Running Profit",
    "Best Odds",
    "Running Profit Best Odds",
    "Tags",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRow {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Meeting")]
    pub meeting: String,
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "EW/Win")]
    pub ew_win: String,
    #[serde(rename = "Trainer")]
    pub trainer: String,
    #[serde(rename = "Jockey")]
    pub jockey: String,
    #[serde(rename = "Horse")]
    pub horse: String,
    #[serde(rename = "Odds", default, deserialize_with = "de_numeric_cell")]
    pub odds: f64,
    #[serde(rename = "SP", default, deserialize_with = "de_numeric_cell")]
    pub sp: f64,
    #[serde(rename = "Value")]
    pub value: String,
    #[serde(rename = "Result")]
    pub result: String,
    #[serde(rename = "Stake", default, deserialize_with = "de_numeric_cell")]
    pub stake: f64,
    #[serde(rename = "Profit", default, deserialize_with = "de_numeric_cell")]
    pub profit: f64,
    #[serde(rename = "Running Profit", default, deserialize_with = "de_numeric_cell")]
    pub running_profit: f64,
    #[serde(rename = "Best Odds", default, deserialize_with = "de_numeric_cell")]
    pub best_odds: f64,
    #[serde(rename = "Running Profit Best Odds", default, deserialize_with = "de_numeric_cell")]
    pub running_profit_best: f64,
    #[serde(rename = "Tags", default)]
    pub tags: Option<String>,
}

impl LogRow {
    pub fn is_legacy(&self) -> bool {
        self.date.contains(LEGACY_DATE_MARKER)
    }

    /// Tags are stored `;`-separated in a single column.
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .unwrap_or_default()
            .split(';')
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub existing_rows: usize,
    pub legacy_rows_dropped: usize,
    pub rows_replaced: usize,
    pub rows_appended: usize,
    pub total_rows: usize,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid master log path: {0}")]
    InvalidPath(PathBuf),
}

/// Reads the master log. An absent file is an empty log.
pub fn read_master_log(path: &Path) -> Result<Vec<LogRow>, LedgerError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = fs::read(path)?;
    parse_master_log(&bytes)
}

pub fn parse_master_log(bytes: &[u8]) -> Result<Vec<LogRow>, LedgerError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.deserialize::<LogRow>() {
        rows.push(record?);
    }
    Ok(rows)
}

/// Drops legacy rows and same-day rows for horses present in `new_rows`, then appends `new_rows`.
/// Numeric cells written by older tooling may be blank or `nan`; both read as 0.0.
fn de_numeric_cell<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let cell = Option::<String>::deserialize(deserializer)?;
    Ok(cell
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(0.0))
}

pub fn merge_day(
    existing: Vec<LogRow>,
    date: &str,
    new_rows: Vec<LogRow>,
) -> (Vec<LogRow>, MergeReport) {
    let existing_rows = existing.len();
    let new_horses: HashSet<&str> = new_rows.iter().map(|row| row.horse.as_str()).collect();

    let mut legacy_rows_dropped = 0usize;
    let mut rows_replaced = 0usize;
    let mut kept = Vec::with_capacity(existing_rows + new_rows.len());
    for row in existing {
        if row.is_legacy() {
            legacy_rows_dropped += 1;
        } else if row.date == date && new_horses.contains(row.horse.as_str()) {
            rows_replaced += 1;
        } else {
            kept.push(row);
        }
    }

    let rows_appended = new_rows.len();
    kept.extend(new_rows);

    let report = MergeReport {
        existing_rows,
        legacy_rows_dropped,
        rows_replaced,
        rows_appended,
        total_rows: kept.len(),
    };
    (kept, report)
}

pub fn encode_master_log(rows: &[LogRow]) -> Result<Vec<u8>, LedgerError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(MASTER_LOG_HEADERS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|err| LedgerError::Io(err.into_error()))
}

/// Writes the whole log through a temp file and rename.
pub fn write_master_log(path: &Path, rows: &[LogRow]) -> Result<(), LedgerError> {
    let bytes = encode_master_log(rows)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| LedgerError::InvalidPath(path.to_path_buf()))?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;

    info!(
        component = "ledger",
        event = "ledger.write.finish",
        path = %path.display(),
        rows = rows.len(),
        bytes = bytes.len()
    );
    Ok(())
}
