//! Profit settlement for win and each-way tips, and the daily settlement run.

use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::SettlementConfig;
use crate::ledger::{
    merge_day, read_master_log, write_master_log, LedgerError, LogRow, MergeReport,
};
use crate::results::{load_results, RaceResult, ResultIndex, ResultsLoadError};
use crate::tips::{load_tips, tips_file_name, Tip, TipLoadError};

pub const DEFAULT_STAKE: f64 = 1.0;

/// Each-way place terms: 1/5 of the odds for the first three.
pub const EACH_WAY_PLACE_FRACTION: f64 = 0.2;
pub const EACH_WAY_PLACES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BetType {
    Win,
    EachWay,
}

impl BetType {
    pub fn label(self) -> &'static str {
        match self {
            Self::Win => "Win",
            Self::EachWay => "EW",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "win" => Some(Self::Win),
            "ew" | "each-way" | "eachway" => Some(Self::EachWay),
            _ => None,
        }
    }
}

impl fmt::Display for BetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Rounds to 2 decimal places, halves away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Profit for one bet at `price`, rounded to 2 dp. Void results return the stake (profit 0).
pub fn settle_profit(result: &RaceResult, bet_type: BetType, price: f64, stake: f64) -> f64 {
    if result.is_void() {
        return 0.0;
    }

    let raw = match bet_type {
        BetType::Win => {
            if result.is_winner() {
                (price - 1.0) * stake
            } else {
                -stake
            }
        }
        BetType::EachWay => {
            let half = stake * 0.5;
            let win_leg = if result.is_winner() {
                (price - 1.0) * half
            } else {
                0.0
            };
            let place_leg = if result.is_placed(EACH_WAY_PLACES) {
                ((price * EACH_WAY_PLACE_FRACTION) - 1.0) * half
            } else {
                -half
            };
            win_leg + place_leg
        }
    };

    round2(raw)
}

/// `odds / sp` as a percentage, or `"-"` without an SP.
pub fn value_label(odds: f64, sp: f64) -> String {
    if sp == 0.0 {
        "-".to_string()
    } else {
        format!("{:?}", round2(odds / sp * 100.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettledTip {
    pub result: RaceResult,
    pub profit_best: f64,
    pub row: LogRow,
}

/// Settles a day's tips in order. Running totals start from zero for every call.
pub fn settle_day(date: &str, tips: &[Tip], results: &ResultIndex, stake: f64) -> Vec<SettledTip> {
    let mut running_profit = 0.0;
    let mut running_best = 0.0;
    let mut out = Vec::with_capacity(tips.len());

    for tip in tips {
        let result = results.result_for(&tip.meeting, &tip.time, &tip.horse);
        let profit = settle_profit(&result, tip.bet_type, tip.sp, stake);
        let profit_best = settle_profit(&result, tip.bet_type, tip.best_odds, stake);
        running_profit += profit;
        running_best += profit_best;

        let row = LogRow {
            date: date.to_string(),
            meeting: tip.meeting.clone(),
            time: tip.time.clone(),
            ew_win: tip.bet_type.label().to_string(),
            trainer: tip.trainer.clone(),
            jockey: tip.jockey.clone(),
            horse: tip.horse.clone(),
            odds: tip.odds,
            sp: tip.sp,
            value: value_label(tip.odds, tip.sp),
            result: result.to_string(),
            stake,
            profit,
            running_profit: round2(running_profit),
            best_odds: tip.best_odds,
            running_profit_best: round2(running_best),
            tags: None,
        };

        out.push(SettledTip {
            result,
            profit_best,
            row,
        });
    }

    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub date: String,
    pub tips_loaded: usize,
    pub matched: usize,
    pub no_result: usize,
    pub profit: f64,
    pub profit_best: f64,
    pub merge: MergeReport,
    pub master_log_written: bool,
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("invalid settlement date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error(transparent)]
    Tips(#[from] TipLoadError),
    #[error(transparent)]
    Results(#[from] ResultsLoadError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub fn parse_run_date(raw: &str) -> Result<NaiveDate, SettlementError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| SettlementError::InvalidDate(raw.to_string()))
}

pub fn tips_path(cfg: &SettlementConfig, date: NaiveDate) -> PathBuf {
    cfg.tips_dir
        .join(tips_file_name(&date.format("%Y-%m-%d").to_string()))
}

pub fn results_path(cfg: &SettlementConfig, date: NaiveDate) -> PathBuf {
    cfg.results_dir
        .join(format!("{}.csv", date.format("%Y_%m_%d")))
}

/// Settles one date and merges it into the master log.
///
/// The merge is an unlocked read-modify-write of a single file: concurrent runs against the same
/// log race, and the last writer wins.
pub fn run_settlement(
    date: NaiveDate,
    cfg: &SettlementConfig,
) -> Result<RunSummary, SettlementError> {
    let date_str = date.format("%Y-%m-%d").to_string();
    info!(
        component = "settlement",
        event = "settle.run.start",
        date = %date_str,
        master_log = %cfg.master_log_path.display(),
        stake = cfg.stake
    );

    let tips = load_tips(&tips_path(cfg, date))?;
    let results = load_results(&results_path(cfg, date))?;
    let settled = settle_day(&date_str, &tips, &results, cfg.stake);

    let matched = settled
        .iter()
        .filter(|tip| tip.result != RaceResult::unmatched())
        .count();
    let no_result = settled.iter().filter(|tip| tip.result.is_void()).count();
    let profit = round2(settled.iter().map(|tip| tip.row.profit).sum());
    let profit_best = round2(settled.iter().map(|tip| tip.profit_best).sum());

    let log_exists = cfg.master_log_path.exists();
    let existing = read_master_log(&cfg.master_log_path)?;
    let new_rows: Vec<LogRow> = settled.into_iter().map(|tip| tip.row).collect();
    let (merged, merge) = merge_day(existing, &date_str, new_rows);

    info!(
        component = "settlement",
        event = "ledger.merge.finish",
        date = %date_str,
        existing_rows = merge.existing_rows,
        legacy_rows_dropped = merge.legacy_rows_dropped,
        rows_replaced = merge.rows_replaced,
        rows_appended = merge.rows_appended,
        total_rows = merge.total_rows
    );

    // Without tips there is nothing to add; only an existing log is rewritten for the legacy purge.
    let master_log_written = merge.rows_appended > 0 || log_exists;
    if master_log_written {
        write_master_log(&cfg.master_log_path, &merged)?;
    }

    let summary = RunSummary {
        date: date_str,
        tips_loaded: tips.len(),
        matched,
        no_result,
        profit,
        profit_best,
        merge,
        master_log_written,
    };

    info!(
        component = "settlement",
        event = "settle.run.finish",
        date = %summary.date,
        tips_loaded = summary.tips_loaded,
        matched = summary.matched,
        no_result = summary.no_result,
        profit = summary.profit,
        profit_best = summary.profit_best
    );

    Ok(summary)
}
