//! Report HTTP routes: an HTML summary page and a JSON snapshot, both driven by query filters.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{info, warn};

use crate::danger_favs::{
    load_danger_favs, sort_danger_favs, DangerFavSort, DangerFavsSnapshot,
};
use crate::ledger::LogRow;
use crate::report::{
    available_dates, build_report, load_band_roi, positive_bands, ConfidenceBand, ConfidenceCache,
    ReportError, ReportFilters, ReportSnapshot, RoiView, TableFilter,
};
use crate::settlement::BetType;
use crate::storage::{fetch_master_log, MasterLogSource, StorageError};

pub const REPORT_TABLE_HEADERS: [&str; 9] = [
    "Date", "Time", "Meeting", "Horse", "EW/Win", "Profit", "Result", "SP", "Confidence",
];

/// Supplies master log rows to the report routes.
pub trait ReportDataSource: Send + Sync + 'static {
    fn rows(&self) -> Result<Arc<Vec<LogRow>>, StorageError>;
}

/// Fixed rows, for tests and offline rendering.
#[derive(Clone)]
pub struct InMemoryLogSource {
    rows: Arc<Vec<LogRow>>,
}

impl InMemoryLogSource {
    pub fn new(rows: Vec<LogRow>) -> Self {
        Self {
            rows: Arc::new(rows),
        }
    }
}

impl ReportDataSource for InMemoryLogSource {
    fn rows(&self) -> Result<Arc<Vec<LogRow>>, StorageError> {
        Ok(Arc::clone(&self.rows))
    }
}

/// Fetches through a [`MasterLogSource`] at most once per refresh interval.
pub struct CachedLogSource {
    source: Box<dyn MasterLogSource>,
    refresh_interval: Duration,
    cached: Mutex<Option<(Instant, Arc<Vec<LogRow>>)>>,
}

impl CachedLogSource {
    pub fn new(source: Box<dyn MasterLogSource>, refresh_interval_ms: u64) -> Self {
        Self {
            source,
            refresh_interval: Duration::from_millis(refresh_interval_ms),
            cached: Mutex::new(None),
        }
    }
}

impl ReportDataSource for CachedLogSource {
    fn rows(&self) -> Result<Arc<Vec<LogRow>>, StorageError> {
        let mut guard = self
            .cached
            .lock()
            .expect("log cache lock should not be poisoned");
        if let Some((fetched_at, rows)) = guard.as_ref() {
            if fetched_at.elapsed() < self.refresh_interval {
                return Ok(Arc::clone(rows));
            }
        }

        let rows = Arc::new(fetch_master_log(self.source.as_ref())?);
        info!(
            component = "dashboard",
            event = "report.cache.refresh",
            location = %self.source.describe(),
            rows = rows.len()
        );
        *guard = Some((Instant::now(), Arc::clone(&rows)));
        Ok(rows)
    }
}

pub struct ReportContext {
    pub data: Arc<dyn ReportDataSource>,
    pub confidence: Mutex<ConfidenceCache>,
    pub roi_stats_path: Option<PathBuf>,
    pub roi_window_days: i64,
    pub predictions_dir: PathBuf,
}

impl ReportContext {
    pub fn new(data: Arc<dyn ReportDataSource>, confidence: ConfidenceCache) -> Self {
        Self {
            data,
            confidence: Mutex::new(confidence),
            roi_stats_path: None,
            roi_window_days: 30,
            predictions_dir: PathBuf::from("predictions"),
        }
    }

    pub fn with_predictions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.predictions_dir = dir.into();
        self
    }

    pub fn with_roi_stats(mut self, path: impl Into<PathBuf>, window_days: i64) -> Self {
        self.roi_stats_path = Some(path.into());
        self.roi_window_days = window_days;
        self
    }

    pub fn snapshot(&self, filters: &ReportFilters) -> Result<ReportSnapshot, ReportError> {
        let rows = self.data.rows()?;
        let bands = self.positive_bands(&rows);
        let mut cache = self
            .confidence
            .lock()
            .expect("confidence cache lock should not be poisoned");
        Ok(build_report(&rows, filters, &mut *cache, &bands))
    }

    /// Danger favourites for `date`, or for the latest date in the log when none is given.
    pub fn danger_favs(
        &self,
        date: Option<NaiveDate>,
        sort: DangerFavSort,
    ) -> Result<DangerFavsSnapshot, ReportError> {
        let date = match date {
            Some(date) => Some(date),
            None => available_dates(&self.data.rows()?).last().copied(),
        };
        let favs = match date {
            Some(date) => load_danger_favs(&self.predictions_dir, date)?.map(|mut favs| {
                sort_danger_favs(&mut favs, sort);
                favs
            }),
            None => None,
        };
        Ok(DangerFavsSnapshot { date, sort, favs })
    }

    fn positive_bands(&self, rows: &[LogRow]) -> BTreeSet<ConfidenceBand> {
        let (Some(path), Some(ref_date)) =
            (self.roi_stats_path.as_ref(), available_dates(rows).last().copied())
        else {
            return BTreeSet::new();
        };

        match load_band_roi(path, ref_date, self.roi_window_days) {
            Ok(roi) => positive_bands(&roi),
            Err(err) => {
                warn!(
                    component = "dashboard",
                    event = "report.roi_stats.error",
                    path = %path.display(),
                    error = %err
                );
                BTreeSet::new()
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportQuery {
    pub start: Option<String>,
    pub end: Option<String>,
    pub trainer: Option<String>,
    pub jockey: Option<String>,
    pub meeting: Option<String>,
    pub bet_type: Option<String>,
    pub tags: Option<String>,
    pub band: Option<String>,
    pub positive_bands_only: Option<String>,
    pub view: Option<String>,
    pub table: Option<String>,
}

impl ReportQuery {
    /// Unparseable values are ignored rather than rejected.
    pub fn to_filters(&self) -> ReportFilters {
        ReportFilters {
            start_date: self.start.as_deref().and_then(parse_query_date),
            end_date: self.end.as_deref().and_then(parse_query_date),
            trainer: non_blank(&self.trainer),
            jockey: non_blank(&self.jockey),
            meeting: non_blank(&self.meeting),
            bet_type: self.bet_type.as_deref().and_then(BetType::from_label),
            tags: self
                .tags
                .as_deref()
                .unwrap_or_default()
                .split(',')
                .map(|tag| tag.trim().to_string())
                .filter(|tag| !tag.is_empty())
                .collect(),
            confidence_band: self.band.as_deref().and_then(ConfidenceBand::from_label),
            positive_bands_only: self
                .positive_bands_only
                .as_deref()
                .map(|raw| {
                    matches!(
                        raw.trim().to_ascii_lowercase().as_str(),
                        "1" | "true" | "on"
                    )
                })
                .unwrap_or(false),
            view: self
                .view
                .as_deref()
                .and_then(RoiView::parse)
                .unwrap_or_default(),
            table: match self.table.as_deref().map(str::trim) {
                Some("winners") => TableFilter::WinnersOnly,
                Some("placed") => TableFilter::PlacedOnly,
                _ => TableFilter::All,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DangerFavsQuery {
    pub date: Option<String>,
    pub sort: Option<String>,
}

pub fn report_router(context: Arc<ReportContext>) -> Router {
    Router::new()
        .route("/report", get(get_report_html))
        .route("/report/summary", get(get_report_snapshot))
        .route("/report/danger-favs", get(get_danger_favs))
        .with_state(ReportAppState { context })
}

pub fn render_report_html(snapshot: &ReportSnapshot) -> String {
    let summary = &snapshot.summary;
    let mut out = String::new();
    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str("<title>Tipping P&amp;L</title>\n");
    out.push_str("<style>body{margin:0;font-family:\"Segoe UI\",sans-serif;background:#f4f6f4;color:#1b2420}.shell{max-width:1200px;margin:0 auto;padding:20px}.hero{background:#1d4d36;color:#f3faf6;border-radius:12px;padding:16px 20px}.metrics{display:flex;gap:12px;flex-wrap:wrap;margin-top:14px}.metric{background:#fff;border:1px solid #d3dcd6;border-radius:10px;padding:10px 14px;min-width:120px}.metric b{display:block;font-size:1.3rem}table{width:100%;border-collapse:collapse;margin-top:16px;background:#fff}th{background:#1d4d36;color:#fff;font-size:.8rem;text-align:left;padding:8px}td{font-size:.85rem;padding:7px 8px;border-bottom:1px solid #e1e6e3}.pos{color:#1a7f37}.neg{color:#b42318}</style>\n");
    out.push_str("</head><body><main class=\"shell\">\n");
    out.push_str("<section class=\"hero\"><h1>Tipping P&amp;L</h1>");
    out.push_str(&format!(
        "<div>View: {} | Dates: {}</div>",
        escape_html(snapshot.view.label()),
        date_span(&snapshot.selected_dates)
    ));
    out.push_str("</section>\n<section class=\"metrics\">");
    for (label, value) in [
        ("Tips", summary.tips.to_string()),
        ("Winners", summary.winners.to_string()),
        ("Profit (pts)", format!("{:.2}", summary.profit)),
        ("ROI %", format!("{:.2}%", summary.roi_pct)),
        ("Strike Rate %", format!("{:.2}%", summary.strike_rate_pct)),
    ] {
        out.push_str(&format!(
            "<div class=\"metric\">{}<b>{}</b></div>",
            escape_html(label),
            escape_html(&value)
        ));
    }
    out.push_str("</section>\n");

    out.push_str("<table id=\"cumulative-table\"><thead><tr><th>Date</th><th>Day Profit</th><th>Cumulative Profit</th></tr></thead><tbody>\n");
    for point in &snapshot.daily {
        out.push_str(&format!(
            "<tr><td>{}</td><td class=\"{}\">{:.2}</td><td class=\"{}\">{:.2}</td></tr>\n",
            point.date,
            sign_class(point.profit),
            point.profit,
            sign_class(point.cumulative_profit),
            point.cumulative_profit
        ));
    }
    out.push_str("</tbody></table>\n");

    out.push_str("<table id=\"tips-table\"><thead><tr>");
    for header in REPORT_TABLE_HEADERS {
        out.push_str("<th>");
        out.push_str(&escape_html(header));
        out.push_str("</th>");
    }
    out.push_str("</tr></thead><tbody>\n");
    for row in &snapshot.table {
        let confidence = row
            .confidence
            .map(|value| format!("{value:.2}"))
            .unwrap_or_else(|| "-".to_string());
        let cells = [
            row.date.to_string(),
            row.time.clone(),
            row.meeting.clone(),
            row.horse.clone(),
            row.ew_win.clone(),
            format!("{:.2}", row.profit),
            row.result.clone(),
            format!("{:.2}", row.sp),
            confidence,
        ];
        out.push_str("<tr>");
        for (idx, cell) in cells.iter().enumerate() {
            if idx == 5 {
                out.push_str(&format!("<td class=\"{}\">", sign_class(row.profit)));
            } else {
                out.push_str("<td>");
            }
            out.push_str(&escape_html(cell));
            out.push_str("</td>");
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody></table></main></body></html>\n");
    out
}

fn date_span(dates: &[NaiveDate]) -> String {
    match (dates.first(), dates.last()) {
        (Some(first), Some(last)) if first == last => first.to_string(),
        (Some(first), Some(last)) => format!("{first} \u{2192} {last}"),
        _ => "-".to_string(),
    }
}

fn sign_class(value: f64) -> &'static str {
    if value > 0.0 {
        "pos"
    } else if value < 0.0 {
        "neg"
    } else {
        ""
    }
}

fn parse_query_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[derive(Clone)]
struct ReportAppState {
    context: Arc<ReportContext>,
}

async fn run_blocking<T, F>(state: ReportAppState, work: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&ReportContext) -> Result<T, ReportError> + Send + 'static,
{
    let context = Arc::clone(&state.context);
    let joined = tokio::task::spawn_blocking(move || work(context.as_ref())).await;

    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            warn!(
                component = "dashboard",
                event = "report.snapshot.error",
                error = %err
            );
            Err((
                StatusCode::BAD_GATEWAY,
                format!("could not load report data: {err}"),
            )
                .into_response())
        }
        Err(err) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("report task failed: {err}"),
        )
            .into_response()),
    }
}

async fn load_snapshot(
    state: ReportAppState,
    query: ReportQuery,
) -> Result<ReportSnapshot, Response> {
    let filters = query.to_filters();
    run_blocking(state, move |context| context.snapshot(&filters)).await
}

async fn get_report_html(
    State(state): State<ReportAppState>,
    Query(query): Query<ReportQuery>,
) -> Response {
    match load_snapshot(state, query).await {
        Ok(snapshot) => Html(render_report_html(&snapshot)).into_response(),
        Err(response) => response,
    }
}

async fn get_report_snapshot(
    State(state): State<ReportAppState>,
    Query(query): Query<ReportQuery>,
) -> Response {
    match load_snapshot(state, query).await {
        Ok(snapshot) => {
            info!(
                component = "dashboard",
                event = "http.report.snapshot",
                tips = snapshot.summary.tips
            );
            Json(snapshot).into_response()
        }
        Err(response) => response,
    }
}

async fn get_danger_favs(
    State(state): State<ReportAppState>,
    Query(query): Query<DangerFavsQuery>,
) -> Response {
    let date = query.date.as_deref().and_then(parse_query_date);
    let sort = query
        .sort
        .as_deref()
        .and_then(DangerFavSort::parse)
        .unwrap_or_default();

    match run_blocking(state, move |context| context.danger_favs(date, sort)).await {
        Ok(snapshot) => {
            info!(
                component = "dashboard",
                event = "http.report.danger_favs",
                date = ?snapshot.date,
                favs = snapshot.favs.as_ref().map_or(0, Vec::len)
            );
            Json(snapshot).into_response()
        }
        Err(response) => response,
    }
}
