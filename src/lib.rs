//! Tip settlement and P&L reporting.
//!
//! - settlement: match sent tips to race results, settle win/each-way profit, merge the master log
//! - reporting: filter the master log and derive ROI, strike rate and cumulative profit

mod config;
mod danger_favs;
mod dashboard;
mod ledger;
mod observability;
mod report;
mod results;
mod settlement;
mod storage;
mod tips;

pub use config::{
    logging_config_from_env, report_server_config_from_env, settlement_config_from_env,
    storage_config_from_env, AwsCredentials, ConfigError, ReportServerConfig, SettlementConfig,
    StorageConfig, DEFAULT_AWS_REGION,
};
pub use danger_favs::{
    danger_favs_path, load_danger_favs, sort_danger_favs, DangerFav, DangerFavSort,
    DangerFavsSnapshot, DANGER_FAVS_FILE,
};
pub use dashboard::{
    render_report_html, report_router, CachedLogSource, DangerFavsQuery, InMemoryLogSource,
    ReportContext, ReportDataSource, ReportQuery, REPORT_TABLE_HEADERS,
};
pub use ledger::{
    encode_master_log, merge_day, parse_master_log, read_master_log, write_master_log,
    LedgerError, LogRow, MergeReport, LEGACY_DATE_MARKER, MASTER_LOG_HEADERS,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_settle_summary, log_source_selected, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use report::{
    available_dates, build_report, load_band_roi, parse_band_roi, positive_bands, view_profit,
    ConfidenceBand, ConfidenceCache, ConfidenceLookup, DailyPoint, ReportError, ReportFilters,
    ReportSnapshot, RoiView, SummaryStats, TableFilter, TableRow, DEFAULT_RECENT_DATES,
};
pub use results::{
    load_results, normalize_name, normalize_off_time, parse_results_csv, NonFinishReason,
    RaceResult, ResultIndex, ResultRow, ResultsLoadError,
};
pub use settlement::{
    parse_run_date, results_path, round2, run_settlement, settle_day, settle_profit, tips_path,
    value_label, BetType, RunSummary, SettledTip, SettlementError, DEFAULT_STAKE,
    EACH_WAY_PLACES, EACH_WAY_PLACE_FRACTION,
};
pub use storage::{
    fetch_master_log, sign_get_request, HttpFetcher, HttpResponse, LocalFileSource,
    MasterLogSource, ReqwestBlockingFetcher, S3ObjectSource, StorageError,
};
pub use tips::{
    load_tips, parse_tip_lines, split_race_label, tips_file_name, RawTip, Tip, TipLoadError,
    EACH_WAY_MIN_ODDS, UNKNOWN_TEXT, UNKNOWN_TIME,
};
