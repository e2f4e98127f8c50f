//! Reporting over the master log: filters, ROI views, summary statistics and confidence bands.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ledger::LogRow;
use crate::results::{normalize_name, normalize_off_time, RaceResult};
use crate::settlement::{round2, settle_profit, BetType, EACH_WAY_PLACES};
use crate::storage::StorageError;
use crate::tips::{load_tips, tips_file_name};

pub const DEFAULT_RECENT_DATES: usize = 7;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("ROI stats file is missing required column '{0}'")]
    MissingColumn(&'static str),
}

/// Which staking policy profits are recomputed under, independent of the row's own EW/Win flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoiView {
    #[default]
    WinOnly,
    EachWay,
}

impl RoiView {
    pub fn bet_type(self) -> BetType {
        match self {
            Self::WinOnly => BetType::Win,
            Self::EachWay => BetType::EachWay,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::WinOnly => "Win Only",
            Self::EachWay => "Each-Way",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "win" | "win_only" | "win-only" => Some(Self::WinOnly),
            "ew" | "each_way" | "each-way" | "eachway" => Some(Self::EachWay),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConfidenceBand {
    B50To60,
    B60To70,
    B70To80,
    B80To90,
    B90To100,
    B99To101,
}

impl ConfidenceBand {
    pub const ALL: [ConfidenceBand; 6] = [
        Self::B50To60,
        Self::B60To70,
        Self::B70To80,
        Self::B80To90,
        Self::B90To100,
        Self::B99To101,
    ];

    pub fn bounds(self) -> (f64, f64) {
        match self {
            Self::B50To60 => (0.50, 0.60),
            Self::B60To70 => (0.60, 0.70),
            Self::B70To80 => (0.70, 0.80),
            Self::B80To90 => (0.80, 0.90),
            Self::B90To100 => (0.90, 1.00),
            Self::B99To101 => (0.99, 1.01),
        }
    }

    /// First bin with `low <= conf < high`; the last two bins overlap and the earlier one wins.
    pub fn for_confidence(conf: f64) -> Option<Self> {
        Self::ALL.into_iter().find(|band| {
            let (low, high) = band.bounds();
            low <= conf && conf < high
        })
    }

    pub fn label(self) -> String {
        let (low, high) = self.bounds();
        format!("{low:.2}\u{2013}{high:.2}")
    }

    /// Accepts the en-dash label as well as a plain `-` separator.
    pub fn from_label(raw: &str) -> Option<Self> {
        let wanted = raw.trim().replace('-', "\u{2013}");
        Self::ALL.into_iter().find(|band| band.label() == wanted)
    }
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableFilter {
    #[default]
    All,
    WinnersOnly,
    PlacedOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportFilters {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub trainer: Option<String>,
    pub jockey: Option<String>,
    pub meeting: Option<String>,
    pub bet_type: Option<BetType>,
    pub tags: Vec<String>,
    pub confidence_band: Option<ConfidenceBand>,
    pub positive_bands_only: bool,
    pub view: RoiView,
    pub table: TableFilter,
}

impl ReportFilters {
    fn needs_confidence(&self) -> bool {
        self.confidence_band.is_some() || self.positive_bands_only
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub tips: usize,
    pub winners: usize,
    pub placed: usize,
    pub stake: f64,
    pub profit: f64,
    pub roi_pct: f64,
    pub strike_rate_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub profit: f64,
    pub cumulative_profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub date: NaiveDate,
    pub time: String,
    pub meeting: String,
    pub horse: String,
    pub trainer: String,
    pub jockey: String,
    pub ew_win: String,
    pub sp: f64,
    pub result: String,
    pub profit: f64,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub view: RoiView,
    pub available_dates: Vec<NaiveDate>,
    pub selected_dates: Vec<NaiveDate>,
    pub summary: SummaryStats,
    pub daily: Vec<DailyPoint>,
    pub table: Vec<TableRow>,
}

/// A log row with its parsed date and profit recomputed under a view.
#[derive(Debug, Clone, PartialEq)]
struct ViewRow<'a> {
    date: NaiveDate,
    row: &'a LogRow,
    result: RaceResult,
    profit: f64,
    confidence: Option<f64>,
}

pub fn view_profit(row: &LogRow, view: RoiView) -> f64 {
    let result = RaceResult::from_position(&row.result);
    settle_profit(&result, view.bet_type(), row.sp, row.stake)
}

/// Distinct dates in the log, ascending. Rows with unparseable dates are ignored.
pub fn available_dates(rows: &[LogRow]) -> Vec<NaiveDate> {
    rows.iter()
        .filter_map(|row| parse_log_date(&row.date))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn build_report(
    rows: &[LogRow],
    filters: &ReportFilters,
    confidence: &mut dyn ConfidenceLookup,
    positive_bands: &BTreeSet<ConfidenceBand>,
) -> ReportSnapshot {
    let available = available_dates(rows);
    let selected = select_dates(&available, filters);
    let selected_set: BTreeSet<NaiveDate> = selected.iter().copied().collect();

    let mut view_rows = Vec::new();
    for row in rows {
        let Some(date) = parse_log_date(&row.date) else {
            debug!(
                component = "report",
                event = "report.row.skip_date",
                date = %row.date
            );
            continue;
        };
        if !selected_set.contains(&date) || !matches_row_filters(row, filters) {
            continue;
        }

        let conf = if filters.needs_confidence() {
            confidence.confidence_for(date, &row.meeting, &row.time, &row.horse)
        } else {
            None
        };
        if filters.needs_confidence() {
            let band = conf.and_then(ConfidenceBand::for_confidence);
            let Some(band) = band else {
                continue;
            };
            if filters.confidence_band.is_some_and(|wanted| wanted != band) {
                continue;
            }
            if filters.positive_bands_only && !positive_bands.contains(&band) {
                continue;
            }
        }

        let result = RaceResult::from_position(&row.result);
        let profit = settle_profit(&result, filters.view.bet_type(), row.sp, row.stake);
        view_rows.push(ViewRow {
            date,
            row,
            result,
            profit,
            confidence: conf,
        });
    }

    // Stable: rows within a date keep log order.
    view_rows.sort_by_key(|entry| entry.date);

    let summary = summarize(&view_rows);
    let daily = daily_points(&view_rows);
    let table = table_rows(&view_rows, filters.table);

    info!(
        component = "report",
        event = "report.build",
        view = filters.view.label(),
        selected_dates = selected.len(),
        tips = summary.tips,
        profit = summary.profit
    );

    ReportSnapshot {
        view: filters.view,
        available_dates: available,
        selected_dates: selected,
        summary,
        daily,
        table,
    }
}

fn select_dates(available: &[NaiveDate], filters: &ReportFilters) -> Vec<NaiveDate> {
    if filters.start_date.is_none() && filters.end_date.is_none() {
        let skip = available.len().saturating_sub(DEFAULT_RECENT_DATES);
        return available[skip..].to_vec();
    }

    available
        .iter()
        .copied()
        .filter(|date| filters.start_date.map_or(true, |start| *date >= start))
        .filter(|date| filters.end_date.map_or(true, |end| *date <= end))
        .collect()
}

fn matches_row_filters(row: &LogRow, filters: &ReportFilters) -> bool {
    if !text_matches(&row.trainer, filters.trainer.as_deref())
        || !text_matches(&row.jockey, filters.jockey.as_deref())
        || !text_matches(&row.meeting, filters.meeting.as_deref())
    {
        return false;
    }

    if let Some(bet_type) = filters.bet_type {
        if BetType::from_label(&row.ew_win) != Some(bet_type) {
            return false;
        }
    }

    if !filters.tags.is_empty() {
        let row_tags: Vec<String> = row
            .tag_list()
            .into_iter()
            .map(|tag| tag.to_lowercase())
            .collect();
        let all_present = filters
            .tags
            .iter()
            .all(|wanted| row_tags.contains(&wanted.trim().to_lowercase()));
        if !all_present {
            return false;
        }
    }

    true
}

fn text_matches(value: &str, wanted: Option<&str>) -> bool {
    match wanted.map(str::trim).filter(|w| !w.is_empty()) {
        Some(wanted) => value.trim().eq_ignore_ascii_case(wanted),
        None => true,
    }
}

fn summarize(rows: &[ViewRow<'_>]) -> SummaryStats {
    let tips = rows.len();
    let winners = rows.iter().filter(|entry| entry.result.is_winner()).count();
    let placed = rows
        .iter()
        .filter(|entry| entry.result.is_placed(EACH_WAY_PLACES))
        .count();
    let stake: f64 = rows.iter().map(|entry| entry.row.stake).sum();
    let profit = round2(rows.iter().map(|entry| entry.profit).sum());

    let roi_pct = if stake != 0.0 {
        round2(profit / stake * 100.0)
    } else {
        0.0
    };
    let strike_rate_pct = if tips > 0 {
        round2(winners as f64 / tips as f64 * 100.0)
    } else {
        0.0
    };

    SummaryStats {
        tips,
        winners,
        placed,
        stake: round2(stake),
        profit,
        roi_pct,
        strike_rate_pct,
    }
}

fn daily_points(rows: &[ViewRow<'_>]) -> Vec<DailyPoint> {
    let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for entry in rows {
        *by_date.entry(entry.date).or_insert(0.0) += entry.profit;
    }

    let mut cumulative = 0.0;
    by_date
        .into_iter()
        .map(|(date, profit)| {
            cumulative += profit;
            DailyPoint {
                date,
                profit: round2(profit),
                cumulative_profit: round2(cumulative),
            }
        })
        .collect()
}

fn table_rows(rows: &[ViewRow<'_>], filter: TableFilter) -> Vec<TableRow> {
    let mut out: Vec<TableRow> = rows
        .iter()
        .filter(|entry| match filter {
            TableFilter::All => true,
            TableFilter::WinnersOnly => entry.result.is_winner(),
            TableFilter::PlacedOnly => entry.result.is_placed(EACH_WAY_PLACES),
        })
        .map(|entry| TableRow {
            date: entry.date,
            time: entry.row.time.clone(),
            meeting: entry.row.meeting.clone(),
            horse: entry.row.horse.clone(),
            trainer: entry.row.trainer.clone(),
            jockey: entry.row.jockey.clone(),
            ew_win: entry.row.ew_win.clone(),
            sp: entry.row.sp,
            result: entry.row.result.clone(),
            profit: entry.profit,
            confidence: entry.confidence,
        })
        .collect();

    out.sort_by(|a, b| {
        (Reverse(a.date), time_sort_key(&a.time)).cmp(&(Reverse(b.date), time_sort_key(&b.time)))
    });
    out
}

fn time_sort_key(time: &str) -> (u32, u32, String) {
    let normalized = normalize_off_time(time);
    let parsed = normalized
        .split_once(':')
        .and_then(|(h, m)| Some((h.parse::<u32>().ok()?, m.parse::<u32>().ok()?)));
    match parsed {
        Some((hour, minute)) => (hour, minute, String::new()),
        None => (u32::MAX, u32::MAX, normalized),
    }
}

fn parse_log_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Source of the confidence a tip was sent with.
pub trait ConfidenceLookup {
    fn confidence_for(
        &mut self,
        date: NaiveDate,
        meeting: &str,
        time: &str,
        horse: &str,
    ) -> Option<f64>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConfidenceKey {
    meeting: String,
    time: String,
    horse: String,
}

impl ConfidenceKey {
    fn new(meeting: &str, time: &str, horse: &str) -> Self {
        Self {
            meeting: normalize_name(meeting),
            time: normalize_off_time(time),
            horse: normalize_name(horse),
        }
    }
}

/// Per-date confidence maps loaded from the sent-tip files, bounded to `capacity` dates with
/// oldest-loaded-first eviction.
#[derive(Debug)]
pub struct ConfidenceCache {
    tips_dir: PathBuf,
    capacity: usize,
    days: HashMap<NaiveDate, HashMap<ConfidenceKey, f64>>,
    order: VecDeque<NaiveDate>,
}

impl ConfidenceCache {
    pub fn new(tips_dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            tips_dir: tips_dir.into(),
            capacity: capacity.max(1),
            days: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.days.contains_key(&date)
    }

    pub fn clear(&mut self) {
        self.days.clear();
        self.order.clear();
    }

    fn load_day(&self, date: NaiveDate) -> HashMap<ConfidenceKey, f64> {
        let path = self
            .tips_dir
            .join(tips_file_name(&date.format("%Y-%m-%d").to_string()));
        // Missing or unreadable files cache as empty so the lookup is not repeated.
        let tips = match load_tips(&path) {
            Ok(tips) => tips,
            Err(err) => {
                warn!(
                    component = "report",
                    event = "report.confidence.load_error",
                    date = %date,
                    path = %path.display(),
                    error = %err
                );
                Vec::new()
            }
        };
        tips.into_iter()
            .map(|tip| {
                (
                    ConfidenceKey::new(&tip.meeting, &tip.time, &tip.horse),
                    tip.confidence,
                )
            })
            .collect()
    }

    fn insert_day(&mut self, date: NaiveDate, day: HashMap<ConfidenceKey, f64>) {
        while self.days.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.days.remove(&oldest);
            debug!(
                component = "report",
                event = "report.confidence_cache.evict",
                date = %oldest
            );
        }
        self.order.push_back(date);
        self.days.insert(date, day);
    }
}

impl ConfidenceLookup for ConfidenceCache {
    fn confidence_for(
        &mut self,
        date: NaiveDate,
        meeting: &str,
        time: &str,
        horse: &str,
    ) -> Option<f64> {
        if !self.days.contains_key(&date) {
            let day = self.load_day(date);
            self.insert_day(date, day);
        }
        self.days
            .get(&date)
            .and_then(|day| day.get(&ConfidenceKey::new(meeting, time, horse)))
            .copied()
    }
}

/// ROI per confidence band over `[ref_date - window_days, ref_date]` from the per-day stats CSV
/// (`Date, Confidence Bin, Tips, Win PnL`). A missing file yields an empty map.
pub fn load_band_roi(
    path: &Path,
    ref_date: NaiveDate,
    window_days: i64,
) -> Result<BTreeMap<ConfidenceBand, f64>, ReportError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let bytes = fs::read(path)?;
    parse_band_roi(&bytes, ref_date, window_days)
}

pub fn parse_band_roi(
    bytes: &[u8],
    ref_date: NaiveDate,
    window_days: i64,
) -> Result<BTreeMap<ConfidenceBand, f64>, ReportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();
    let find = |name: &'static str| {
        headers
            .iter()
            .position(|header| header.trim() == name)
            .ok_or(ReportError::MissingColumn(name))
    };
    let date_idx = find("Date")?;
    let band_idx = find("Confidence Bin")?;
    let tips_idx = find("Tips")?;
    let pnl_idx = find("Win PnL")?;

    let start = ref_date - ChronoDuration::days(window_days);
    let mut totals: BTreeMap<ConfidenceBand, (f64, f64)> = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        let cell = |idx: usize| record.get(idx).unwrap_or_default().trim();
        let Some(date) = parse_log_date(cell(date_idx)) else {
            continue;
        };
        if date < start || date > ref_date {
            continue;
        }
        let Some(band) = ConfidenceBand::from_label(cell(band_idx)) else {
            continue;
        };
        let tips = cell(tips_idx).parse::<f64>().unwrap_or(0.0);
        let pnl = cell(pnl_idx).parse::<f64>().unwrap_or(0.0);
        let entry = totals.entry(band).or_insert((0.0, 0.0));
        entry.0 += tips;
        entry.1 += pnl;
    }

    Ok(totals
        .into_iter()
        .map(|(band, (tips, pnl))| (band, if tips != 0.0 { pnl / tips } else { 0.0 }))
        .collect())
}

pub fn positive_bands(roi: &BTreeMap<ConfidenceBand, f64>) -> BTreeSet<ConfidenceBand> {
    roi.iter()
        .filter(|(_, value)| **value > 0.0)
        .map(|(band, _)| *band)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FixedConfidence(HashMap<String, f64>);

    impl ConfidenceLookup for FixedConfidence {
        fn confidence_for(&mut self, _: NaiveDate, _: &str, _: &str, horse: &str) -> Option<f64> {
            self.0.get(horse).copied()
        }
    }

    fn row(date: &str, horse: &str, ew: &str, sp: f64, result: &str) -> LogRow {
        LogRow {
            date: date.to_string(),
            meeting: "Ascot".to_string(),
            time: "14:30".to_string(),
            ew_win: ew.to_string(),
            trainer: "A Trainer".to_string(),
            jockey: "A Jockey".to_string(),
            horse: horse.to_string(),
            odds: sp,
            sp,
            value: "100.0".to_string(),
            result: result.to_string(),
            stake: 1.0,
            profit: 0.0,
            running_profit: 0.0,
            best_odds: sp,
            running_profit_best: 0.0,
            tags: None,
        }
    }

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    fn all_dates() -> ReportFilters {
        ReportFilters {
            start_date: Some(date("2000-01-01")),
            ..ReportFilters::default()
        }
    }

    #[test]
    fn bands_use_first_matching_bin() {
        assert_eq!(ConfidenceBand::for_confidence(0.49), None);
        assert_eq!(
            ConfidenceBand::for_confidence(0.5),
            Some(ConfidenceBand::B50To60)
        );
        assert_eq!(
            ConfidenceBand::for_confidence(0.995),
            Some(ConfidenceBand::B90To100)
        );
        assert_eq!(
            ConfidenceBand::for_confidence(1.0),
            Some(ConfidenceBand::B99To101)
        );
        assert_eq!(ConfidenceBand::B70To80.label(), "0.70\u{2013}0.80");
        assert_eq!(
            ConfidenceBand::from_label("0.70-0.80"),
            Some(ConfidenceBand::B70To80)
        );
    }

    #[test]
    fn summary_recomputes_profit_under_selected_view() {
        let rows = vec![
            row("2025-06-01", "A", "Win", 4.0, "1"),
            row("2025-06-01", "B", "EW", 6.0, "2"),
            row("2025-06-02", "C", "Win", 3.0, "NR"),
            row("2025-06-02", "D", "Win", 2.0, "PU"),
        ];
        let mut conf = FixedConfidence::default();

        let win = build_report(&rows, &all_dates(), &mut conf, &BTreeSet::new());
        assert_eq!(win.summary.tips, 4);
        assert_eq!(win.summary.winners, 1);
        assert_eq!(win.summary.placed, 2);
        assert_eq!(win.summary.profit, 1.0);
        assert_eq!(win.summary.roi_pct, 25.0);
        assert_eq!(win.summary.strike_rate_pct, 25.0);

        let ew_filters = ReportFilters {
            view: RoiView::EachWay,
            ..all_dates()
        };
        let ew = build_report(&rows, &ew_filters, &mut conf, &BTreeSet::new());
        // 1.4 (A) + 0.1 (B) + 0 (C) - 0.5 (D)
        assert_eq!(ew.summary.profit, 1.0);
        assert_eq!(
            ew.daily,
            vec![
                DailyPoint {
                    date: date("2025-06-01"),
                    profit: 1.5,
                    cumulative_profit: 1.5
                },
                DailyPoint {
                    date: date("2025-06-02"),
                    profit: -0.5,
                    cumulative_profit: 1.0
                },
            ]
        );
    }

    #[test]
    fn default_range_is_last_seven_dates() {
        let rows: Vec<LogRow> = (1..=10)
            .map(|day| row(&format!("2025-06-{day:02}"), "A", "Win", 2.0, "2"))
            .chain(std::iter::once(row("2025-06-03_realistic", "Z", "Win", 2.0, "1")))
            .collect();
        let mut conf = FixedConfidence::default();

        let report = build_report(&rows, &ReportFilters::default(), &mut conf, &BTreeSet::new());
        assert_eq!(report.available_dates.len(), 10);
        assert_eq!(report.selected_dates.first(), Some(&date("2025-06-04")));
        assert_eq!(report.summary.tips, 7);
    }

    #[test]
    fn row_filters_are_case_insensitive_and_tags_must_all_match() {
        let mut tagged = row("2025-06-01", "A", "Win", 4.0, "1");
        tagged.tags = Some("nap;Value".to_string());
        let mut other = row("2025-06-01", "B", "EW", 4.0, "1");
        other.trainer = "Someone Else".to_string();
        let rows = vec![tagged, other];
        let mut conf = FixedConfidence::default();

        let filters = ReportFilters {
            trainer: Some("a trainer".to_string()),
            tags: vec!["value".to_string(), "NAP".to_string()],
            ..all_dates()
        };
        let report = build_report(&rows, &filters, &mut conf, &BTreeSet::new());
        assert_eq!(report.summary.tips, 1);
        assert_eq!(report.table[0].horse, "A");

        let filters = ReportFilters {
            bet_type: Some(BetType::EachWay),
            ..all_dates()
        };
        let report = build_report(&rows, &filters, &mut conf, &BTreeSet::new());
        assert_eq!(report.table.len(), 1);
        assert_eq!(report.table[0].horse, "B");
    }

    #[test]
    fn confidence_filters_drop_rows_without_a_band() {
        let rows = vec![
            row("2025-06-01", "A", "Win", 4.0, "1"),
            row("2025-06-01", "B", "Win", 4.0, "2"),
            row("2025-06-01", "C", "Win", 4.0, "3"),
        ];
        let mut conf = FixedConfidence(HashMap::from([
            ("A".to_string(), 0.72),
            ("B".to_string(), 0.55),
        ]));

        let filters = ReportFilters {
            positive_bands_only: true,
            ..all_dates()
        };
        let positive = BTreeSet::from([ConfidenceBand::B70To80]);
        let report = build_report(&rows, &filters, &mut conf, &positive);
        assert_eq!(report.summary.tips, 1);
        assert_eq!(report.table[0].confidence, Some(0.72));

        let filters = ReportFilters {
            confidence_band: Some(ConfidenceBand::B50To60),
            ..all_dates()
        };
        let report = build_report(&rows, &filters, &mut conf, &BTreeSet::new());
        assert_eq!(report.table.len(), 1);
        assert_eq!(report.table[0].horse, "B");
    }

    #[test]
    fn table_sorts_newest_date_first_then_earliest_time() {
        let mut late = row("2025-06-02", "Late", "Win", 2.0, "2");
        late.time = "16:10".to_string();
        let mut early = row("2025-06-02", "Early", "Win", 2.0, "1");
        early.time = "9:45".to_string();
        let old = row("2025-06-01", "Old", "Win", 2.0, "4");
        let rows = vec![old, late, early];
        let mut conf = FixedConfidence::default();

        let filters = ReportFilters {
            table: TableFilter::All,
            ..all_dates()
        };
        let report = build_report(&rows, &filters, &mut conf, &BTreeSet::new());
        let horses: Vec<&str> = report.table.iter().map(|r| r.horse.as_str()).collect();
        assert_eq!(horses, vec!["Early", "Late", "Old"]);

        let filters = ReportFilters {
            table: TableFilter::WinnersOnly,
            ..all_dates()
        };
        let report = build_report(&rows, &filters, &mut conf, &BTreeSet::new());
        assert_eq!(report.table.len(), 1);
        assert_eq!(report.summary.tips, 3);
    }

    #[test]
    fn band_roi_respects_window_and_sign() {
        let csv = "Date,Confidence Bin,Tips,Win PnL\n\
                   2025-06-01,0.70\u{2013}0.80,10,5\n\
                   2025-06-20,0.70\u{2013}0.80,10,-1\n\
                   2025-06-20,0.50\u{2013}0.60,4,-2\n\
                   2025-04-01,0.50\u{2013}0.60,100,500\n\
                   bad-date,0.50\u{2013}0.60,1,1\n";
        let roi = parse_band_roi(csv.as_bytes(), date("2025-06-21"), 30).unwrap();

        assert_eq!(roi.get(&ConfidenceBand::B70To80), Some(&0.2));
        assert_eq!(roi.get(&ConfidenceBand::B50To60), Some(&-0.5));
        assert_eq!(
            positive_bands(&roi),
            BTreeSet::from([ConfidenceBand::B70To80])
        );
    }

    #[test]
    fn confidence_cache_loads_once_and_evicts_oldest() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("sent_tips_2025-06-01.jsonl"),
            "{\"race\":\"09:05 Ascot\",\"name\":\"Dream Horse\",\"confidence\":0.81}\n",
        )
        .unwrap();

        let mut cache = ConfidenceCache::new(temp.path(), 2);
        assert_eq!(
            cache.confidence_for(date("2025-06-01"), "ascot", "9:05", "Dream Horse (IRE)"),
            Some(0.81)
        );
        assert_eq!(
            cache.confidence_for(date("2025-06-02"), "ascot", "9:05", "x"),
            None
        );
        assert_eq!(cache.len(), 2);

        cache.confidence_for(date("2025-06-03"), "ascot", "9:05", "x");
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(date("2025-06-01")));
        assert!(cache.contains(date("2025-06-03")));
    }

    #[test]
    fn unreadable_tip_file_caches_as_empty() {
        let temp = tempfile::tempdir().unwrap();
        // A directory where the tip file should be makes the read fail.
        fs::create_dir(temp.path().join("sent_tips_2025-06-01.jsonl")).unwrap();

        let mut cache = ConfidenceCache::new(temp.path(), 4);
        assert_eq!(
            cache.confidence_for(date("2025-06-01"), "Ascot", "14:30", "Dream Horse"),
            None
        );
        assert!(cache.contains(date("2025-06-01")));
    }

    #[test]
    fn view_profit_uses_sp_and_result() {
        let winner = row("2025-06-01", "A", "Win", 4.0, "1");
        assert_eq!(view_profit(&winner, RoiView::WinOnly), 3.0);
        assert_eq!(view_profit(&winner, RoiView::EachWay), 1.4);
    }
}
