//! Race results loading, name normalization and tip-to-result matching.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

const MAX_FINISH_POSITION: u32 = 99;

/// Codes for runners that started but did not complete the race. They settle as losers.
const NON_FINISH_CODES: [&str; 13] = [
    "PU", "F", "UR", "BD", "RO", "SU", "RR", "REF", "DSQ", "CO", "LFT", "DNF", "S",
];

const VOID_CODES: [&str; 2] = ["VOI", "VOID"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NonFinishReason {
    NoResult,
    Unmatched,
    Voided,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RaceResult {
    Finished(u32),
    NonFinish(NonFinishReason),
}

impl RaceResult {
    pub fn unmatched() -> Self {
        Self::NonFinish(NonFinishReason::Unmatched)
    }

    /// Classifies a raw scraped `pos` cell. Never fails: anything unrecognized is a no-result.
    pub fn from_position(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(position) = trimmed.parse::<u32>() {
            if (1..=MAX_FINISH_POSITION).contains(&position) {
                return Self::Finished(position);
            }
            return Self::NonFinish(NonFinishReason::NoResult);
        }

        let code = trimmed.to_ascii_uppercase();
        if VOID_CODES.contains(&code.as_str()) {
            Self::NonFinish(NonFinishReason::Voided)
        } else if NON_FINISH_CODES.contains(&code.as_str()) {
            Self::NonFinish(NonFinishReason::Other(code))
        } else {
            Self::NonFinish(NonFinishReason::NoResult)
        }
    }

    pub fn position(&self) -> Option<u32> {
        match self {
            Self::Finished(position) => Some(*position),
            Self::NonFinish(_) => None,
        }
    }

    pub fn is_winner(&self) -> bool {
        self.position() == Some(1)
    }

    pub fn is_placed(&self, places: u32) -> bool {
        self.position().map(|pos| pos <= places).unwrap_or(false)
    }

    /// Whether the stake is returned with no profit or loss.
    pub fn is_void(&self) -> bool {
        matches!(
            self,
            Self::NonFinish(
                NonFinishReason::NoResult | NonFinishReason::Unmatched | NonFinishReason::Voided
            )
        )
    }
}

impl fmt::Display for RaceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished(position) => write!(f, "{position}"),
            Self::NonFinish(NonFinishReason::NoResult | NonFinishReason::Unmatched) => {
                f.write_str("NR")
            }
            Self::NonFinish(NonFinishReason::Voided) => f.write_str("VOID"),
            Self::NonFinish(NonFinishReason::Other(code)) => f.write_str(code),
        }
    }
}

impl FromStr for RaceResult {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_position(s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub course: String,
    pub off: String,
    pub horse: String,
    pub result: RaceResult,
}

#[derive(Debug, Error)]
pub enum ResultsLoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("results table is missing required column '{0}'")]
    MissingColumn(&'static str),
}

/// Lowercases, trims and drops a trailing parenthetical suffix such as a country code.
pub fn normalize_name(text: &str) -> String {
    let mut out = text.trim().to_lowercase();
    while out.ends_with(')') {
        match out.rfind('(') {
            Some(open) => {
                out.truncate(open);
                out = out.trim_end().to_string();
            }
            None => break,
        }
    }
    out.trim().to_string()
}

/// Renders `H:MM`/`HH:MM` as `{hour}:{minute:02}`; other text is only trimmed.
pub fn normalize_off_time(text: &str) -> String {
    let trimmed = text.trim();
    let parsed = trimmed.split_once(':').and_then(|(hour, minute)| {
        let hour = hour.trim().parse::<u32>().ok()?;
        let minute_text = minute.trim();
        if minute_text.len() != 2 {
            return None;
        }
        let minute = minute_text.parse::<u32>().ok()?;
        (hour < 24 && minute < 60).then_some((hour, minute))
    });

    match parsed {
        Some((hour, minute)) => format!("{hour}:{minute:02}"),
        None => trimmed.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MatchKey {
    course: String,
    off: String,
    horse: String,
}

impl MatchKey {
    fn new(course: &str, off: &str, horse: &str) -> Self {
        Self {
            course: normalize_name(course),
            off: normalize_off_time(off),
            horse: normalize_name(horse),
        }
    }
}

/// Results for one day, indexed by normalized `(course, off, horse)`.
#[derive(Debug, Clone, Default)]
pub struct ResultIndex {
    rows: Vec<ResultRow>,
    by_key: HashMap<MatchKey, usize>,
}

impl ResultIndex {
    pub fn new(rows: Vec<ResultRow>) -> Self {
        let mut by_key = HashMap::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            // First row in file order wins.
            by_key
                .entry(MatchKey::new(&row.course, &row.off, &row.horse))
                .or_insert(idx);
        }
        Self { rows, by_key }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn lookup(&self, meeting: &str, time: &str, horse: &str) -> Option<&ResultRow> {
        self.by_key
            .get(&MatchKey::new(meeting, time, horse))
            .map(|idx| &self.rows[*idx])
    }

    pub fn result_for(&self, meeting: &str, time: &str, horse: &str) -> RaceResult {
        self.lookup(meeting, time, horse)
            .map(|row| row.result.clone())
            .unwrap_or_else(RaceResult::unmatched)
    }
}

/// Loads a results CSV. A missing file yields an empty index.
pub fn load_results(path: &Path) -> Result<ResultIndex, ResultsLoadError> {
    if !path.exists() {
        warn!(
            component = "results",
            event = "results.load.missing",
            path = %path.display()
        );
        return Ok(ResultIndex::default());
    }

    let bytes = fs::read(path)?;
    let rows = parse_results_csv(&bytes)?;
    info!(
        component = "results",
        event = "results.load.finish",
        path = %path.display(),
        rows = rows.len()
    );
    Ok(ResultIndex::new(rows))
}

pub fn parse_results_csv(bytes: &[u8]) -> Result<Vec<ResultRow>, ResultsLoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    let course_idx = column_index(&headers, "course")?;
    let off_idx = column_index(&headers, "off")?;
    let horse_idx = column_index(&headers, "horse")?;
    let pos_idx = column_index(&headers, "pos")?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let cell = |idx: usize| record.get(idx).unwrap_or_default();
        let row = ResultRow {
            course: cell(course_idx).to_string(),
            off: cell(off_idx).to_string(),
            horse: cell(horse_idx).to_string(),
            result: RaceResult::from_position(cell(pos_idx)),
        };
        debug!(
            component = "results",
            event = "results.row",
            course = %row.course,
            off = %row.off,
            horse = %row.horse,
            result = %row.result
        );
        rows.push(row);
    }

    Ok(rows)
}

fn column_index(headers: &StringRecord, name: &'static str) -> Result<usize, ResultsLoadError> {
    headers
        .iter()
        .position(|header| header.trim().eq_ignore_ascii_case(name))
        .ok_or(ResultsLoadError::MissingColumn(name))
}
