//! Sent-tip stream loading.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::settlement::BetType;

pub const UNKNOWN_TIME: &str = "??:??";
pub const UNKNOWN_TEXT: &str = "Unknown";

/// Tips at or above these odds are always placed each-way.
pub const EACH_WAY_MIN_ODDS: f64 = 5.0;

/// One raw NDJSON record as written by the tip sender.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTip {
    #[serde(default, deserialize_with = "de_lenient_text")]
    pub race: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_text")]
    pub trainer: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_text")]
    pub jockey: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub odds: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub bf_sp: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub realistic_odds: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub confidence: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_bool")]
    pub each_way: Option<bool>,
}

/// A tip with its race label split and prices resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tip {
    pub time: String,
    pub meeting: String,
    pub horse: String,
    pub trainer: String,
    pub jockey: String,
    pub odds: f64,
    pub sp: f64,
    pub best_odds: f64,
    pub confidence: f64,
    pub bet_type: BetType,
}

impl From<RawTip> for Tip {
    fn from(raw: RawTip) -> Self {
        let race = raw
            .race
            .unwrap_or_else(|| format!("{UNKNOWN_TIME} {UNKNOWN_TEXT}"));
        let (time, meeting) = split_race_label(&race);

        let sp = non_zero(raw.bf_sp).unwrap_or(0.0);
        let odds = non_zero(raw.odds).or(non_zero(raw.bf_sp)).unwrap_or(0.0);
        let best_odds = non_zero(raw.realistic_odds).unwrap_or(odds);
        let bet_type = if odds >= EACH_WAY_MIN_ODDS || raw.each_way.unwrap_or(false) {
            BetType::EachWay
        } else {
            BetType::Win
        };

        Self {
            time,
            meeting,
            horse: raw.name.unwrap_or_else(|| UNKNOWN_TEXT.to_string()),
            trainer: raw.trainer.unwrap_or_else(|| UNKNOWN_TEXT.to_string()),
            jockey: raw.jockey.unwrap_or_else(|| UNKNOWN_TEXT.to_string()),
            odds,
            sp,
            best_odds,
            confidence: raw.confidence.unwrap_or(0.0),
            bet_type,
        }
    }
}

#[derive(Debug, Error)]
pub enum TipLoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Splits `"HH:MM Meeting"` on the first space, falling back to sentinels.
pub fn split_race_label(race: &str) -> (String, String) {
    match race.split_once(' ') {
        Some((time, meeting)) => (time.to_string(), meeting.to_string()),
        None => (UNKNOWN_TIME.to_string(), UNKNOWN_TEXT.to_string()),
    }
}

pub fn tips_file_name(date: &str) -> String {
    format!("sent_tips_{date}.jsonl")
}

/// Loads a day's tips in file order. A missing file yields no tips; malformed lines are skipped.
pub fn load_tips(path: &Path) -> Result<Vec<Tip>, TipLoadError> {
    if !path.exists() {
        warn!(
            component = "tips",
            event = "tips.load.missing",
            path = %path.display()
        );
        return Ok(Vec::new());
    }

    let text = fs::read_to_string(path)?;
    let tips = parse_tip_lines(&text);
    info!(
        component = "tips",
        event = "tips.load.finish",
        path = %path.display(),
        tips = tips.len()
    );
    Ok(tips)
}

pub fn parse_tip_lines(text: &str) -> Vec<Tip> {
    let mut tips = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawTip>(line) {
            Ok(raw) => tips.push(Tip::from(raw)),
            Err(err) => warn!(
                component = "tips",
                event = "tips.load.skip_line",
                line = line_no + 1,
                error = %err
            ),
        }
    }
    tips
}

fn non_zero(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0 && v.is_finite())
}

pub(crate) fn de_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn de_lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

pub(crate) fn de_lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn race_label_splits_on_first_space() {
        assert_eq!(
            split_race_label("14:30 Newton Abbot"),
            ("14:30".to_string(), "Newton Abbot".to_string())
        );
        assert_eq!(
            split_race_label("Ascot"),
            ("??:??".to_string(), "Unknown".to_string())
        );
    }

    #[test]
    fn prices_fall_through_missing_and_zero_values() {
        let tips = parse_tip_lines(
            r#"{"race":"14:30 Ascot","name":"Dream Horse","bf_sp":4.0,"odds":null,"realistic_odds":0}"#,
        );
        assert_eq!(tips.len(), 1);
        assert_eq!(tips[0].sp, 4.0);
        assert_eq!(tips[0].odds, 4.0);
        assert_eq!(tips[0].best_odds, 4.0);
        assert_eq!(tips[0].bet_type, BetType::Win);
        assert_eq!(tips[0].trainer, "Unknown");
    }

    #[test]
    fn each_way_from_odds_threshold_or_hint() {
        let text = concat!(
            r#"{"race":"13:00 York","name":"A","odds":5.0,"bf_sp":6.2}"#,
            "\n",
            r#"{"race":"13:00 York","name":"B","odds":"3.5","each_way":true}"#,
            "\n",
            r#"{"race":"13:00 York","name":"C","odds":4.9,"each_way":false}"#,
        );
        let tips = parse_tip_lines(text);
        assert_eq!(tips.len(), 3);
        assert_eq!(tips[0].bet_type, BetType::EachWay);
        assert_eq!(tips[1].bet_type, BetType::EachWay);
        assert_eq!(tips[1].odds, 3.5);
        assert_eq!(tips[1].sp, 0.0);
        assert_eq!(tips[2].bet_type, BetType::Win);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let text = "{\"race\":\"14:30 Ascot\",\"name\":\"X\"}\nnot json\n\n{\"name\":\"Y\"}\n";
        let tips = parse_tip_lines(text);
        assert_eq!(tips.len(), 2);
        assert_eq!(tips[1].horse, "Y");
        assert_eq!(tips[1].time, "??:??");
        assert_eq!(tips[1].meeting, "Unknown");
    }

    #[test]
    fn missing_file_yields_no_tips() {
        let temp = tempfile::tempdir().unwrap();
        let tips = load_tips(&temp.path().join(tips_file_name("2025-06-01"))).unwrap();
        assert!(tips.is_empty());
    }
}
