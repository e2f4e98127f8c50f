//! Danger favourites: per-date prediction lists of short-priced runners flagged as vulnerable.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::report::ReportError;
use crate::tips::{de_lenient_f64, de_lenient_text};

pub const DANGER_FAVS_FILE: &str = "danger_favs.jsonl";

/// One flagged favourite. Fields beyond the sortable ones are passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DangerFav {
    #[serde(default, deserialize_with = "de_lenient_text")]
    pub race: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub confidence: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub bf_sp: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DangerFavSort {
    #[default]
    Confidence,
    BfSp,
}

impl DangerFavSort {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "confidence" => Some(Self::Confidence),
            "bf_sp" | "sp" => Some(Self::BfSp),
            _ => None,
        }
    }

    fn key(self, fav: &DangerFav) -> Option<f64> {
        match self {
            Self::Confidence => fav.confidence,
            Self::BfSp => fav.bf_sp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DangerFavsSnapshot {
    pub date: Option<NaiveDate>,
    pub sort: DangerFavSort,
    /// `None` when no list was produced for the date.
    pub favs: Option<Vec<DangerFav>>,
}

pub fn danger_favs_path(predictions_dir: &Path, date: NaiveDate) -> PathBuf {
    predictions_dir
        .join(date.format("%Y-%m-%d").to_string())
        .join(DANGER_FAVS_FILE)
}

/// Loads `<predictions_dir>/<YYYY-MM-DD>/danger_favs.jsonl`. A missing file is `Ok(None)`.
pub fn load_danger_favs(
    predictions_dir: &Path,
    date: NaiveDate,
) -> Result<Option<Vec<DangerFav>>, ReportError> {
    let path = danger_favs_path(predictions_dir, date);
    if !path.exists() {
        debug!(
            component = "danger_favs",
            event = "danger_favs.load.missing",
            path = %path.display()
        );
        return Ok(None);
    }

    let text = fs::read_to_string(&path)?;
    let mut favs = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DangerFav>(line) {
            Ok(fav) => favs.push(fav),
            Err(err) => warn!(
                component = "danger_favs",
                event = "danger_favs.load.skip_line",
                path = %path.display(),
                line = line_no + 1,
                error = %err
            ),
        }
    }

    info!(
        component = "danger_favs",
        event = "danger_favs.load.finish",
        path = %path.display(),
        favs = favs.len()
    );
    Ok(Some(favs))
}

/// Highest first; entries without the sort field go last in file order.
pub fn sort_danger_favs(favs: &mut [DangerFav], sort: DangerFavSort) {
    favs.sort_by(|a, b| match (sort.key(a), sort.key(b)) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}
