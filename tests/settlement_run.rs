use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use tempfile::TempDir;
use tipledger::{
    read_master_log, run_settlement, write_master_log, LogRow, SettlementConfig,
    MASTER_LOG_HEADERS,
};

const TIPS: &str = concat!(
    r#"{"race":"14:30 Ascot","name":"Dream Horse","trainer":"A Trainer","jockey":"A Jockey","odds":4.0,"bf_sp":4.0,"realistic_odds":4.5,"confidence":0.82}"#,
    "\n",
    r#"{"race":"15:05 Ascot","name":"Night Owl","trainer":"B Trainer","jockey":"B Jockey","odds":6.0,"bf_sp":6.0,"confidence":0.64}"#,
    "\n",
    "not json at all\n",
    r#"{"race":"16:10 Ascot","name":"Ghost Rider","odds":3.0,"bf_sp":3.0}"#,
    "\n",
);

const RESULTS: &str = "date,course,off,race_name,horse,pos\n\
2025-06-01,Ascot (GB),14:30,Handicap,Dream Horse (IRE),1\n\
2025-06-01,Ascot (GB),15:05,Maiden,Night Owl (GB),2\n\
2025-06-01,Ascot (GB),15:05,Maiden,Dream Horse (IRE),PU\n";

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
}

fn workspace() -> (TempDir, SettlementConfig) {
    let dir = tempfile::tempdir().unwrap();
    let cfg = SettlementConfig {
        tips_dir: dir.path().join("logs"),
        results_dir: dir.path().join("results"),
        master_log_path: dir.path().join("logs").join("master_subscriber_log.csv"),
        stake: 1.0,
    };
    fs::create_dir_all(&cfg.tips_dir).unwrap();
    fs::create_dir_all(&cfg.results_dir).unwrap();
    (dir, cfg)
}

fn write_inputs(cfg: &SettlementConfig) {
    fs::write(cfg.tips_dir.join("sent_tips_2025-06-01.jsonl"), TIPS).unwrap();
    fs::write(cfg.results_dir.join("2025_06_01.csv"), RESULTS).unwrap();
}

fn log_row(date: &str, horse: &str, profit: f64) -> LogRow {
    LogRow {
        date: date.to_string(),
        meeting: "York".to_string(),
        time: "13:15".to_string(),
        ew_win: "Win".to_string(),
        trainer: "C Trainer".to_string(),
        jockey: "C Jockey".to_string(),
        horse: horse.to_string(),
        odds: 2.0,
        sp: 2.0,
        value: "100.0".to_string(),
        result: if profit > 0.0 { "1" } else { "5" }.to_string(),
        stake: 1.0,
        profit,
        running_profit: profit,
        best_odds: 2.0,
        running_profit_best: profit,
        tags: Some("nap".to_string()),
    }
}

fn header_line(path: &Path) -> String {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .next()
        .unwrap_or_default()
        .to_string()
}

#[test]
fn settles_a_day_into_a_new_master_log() {
    let (_dir, cfg) = workspace();
    write_inputs(&cfg);

    let summary = run_settlement(date(), &cfg).unwrap();
    assert_eq!(summary.tips_loaded, 3);
    assert_eq!(summary.matched, 2);
    assert_eq!(summary.no_result, 1);
    assert_eq!(summary.profit, 3.1);
    assert_eq!(summary.profit_best, 3.6);
    assert!(summary.master_log_written);

    assert_eq!(
        header_line(&cfg.master_log_path),
        MASTER_LOG_HEADERS.join(",")
    );

    let rows = read_master_log(&cfg.master_log_path).unwrap();
    assert_eq!(rows.len(), 3);

    assert_eq!(rows[0].horse, "Dream Horse");
    assert_eq!(rows[0].ew_win, "Win");
    assert_eq!(rows[0].result, "1");
    assert_eq!(rows[0].profit, 3.0);
    assert_eq!(rows[0].value, "100.0");
    assert_eq!(rows[0].best_odds, 4.5);
    assert_eq!(rows[0].running_profit_best, 3.5);

    assert_eq!(rows[1].horse, "Night Owl");
    assert_eq!(rows[1].ew_win, "EW");
    assert_eq!(rows[1].result, "2");
    assert_eq!(rows[1].profit, 0.1);
    assert_eq!(rows[1].running_profit, 3.1);

    assert_eq!(rows[2].horse, "Ghost Rider");
    assert_eq!(rows[2].meeting, "Ascot");
    assert_eq!(rows[2].trainer, "Unknown");
    assert_eq!(rows[2].result, "NR");
    assert_eq!(rows[2].profit, 0.0);
    assert_eq!(rows[2].running_profit, 3.1);
    assert_eq!(rows[2].tags, None);
}

#[test]
fn rerunning_a_day_replaces_rather_than_duplicates() {
    let (_dir, cfg) = workspace();
    write_inputs(&cfg);

    run_settlement(date(), &cfg).unwrap();
    let first = read_master_log(&cfg.master_log_path).unwrap();

    let summary = run_settlement(date(), &cfg).unwrap();
    assert_eq!(summary.merge.rows_replaced, 3);
    assert_eq!(summary.merge.total_rows, 3);

    let second = read_master_log(&cfg.master_log_path).unwrap();
    assert_eq!(first, second);
}

#[test]
fn merge_keeps_other_days_and_purges_legacy_rows() {
    let (_dir, cfg) = workspace();
    write_inputs(&cfg);
    write_master_log(
        &cfg.master_log_path,
        &[
            log_row("2025-05-30", "Old Timer", 1.0),
            log_row("2025-05-31_realistic", "Legacy Horse", -1.0),
            log_row("2025-06-01", "Night Owl", -1.0),
            log_row("2025-06-01", "Untipped Today", -1.0),
        ],
    )
    .unwrap();

    let summary = run_settlement(date(), &cfg).unwrap();
    assert_eq!(summary.merge.existing_rows, 4);
    assert_eq!(summary.merge.legacy_rows_dropped, 1);
    assert_eq!(summary.merge.rows_replaced, 1);
    assert_eq!(summary.merge.rows_appended, 3);

    let rows = read_master_log(&cfg.master_log_path).unwrap();
    let horses: Vec<&str> = rows.iter().map(|row| row.horse.as_str()).collect();
    assert_eq!(
        horses,
        vec![
            "Old Timer",
            "Untipped Today",
            "Dream Horse",
            "Night Owl",
            "Ghost Rider"
        ]
    );
    assert_eq!(rows[0].tags.as_deref(), Some("nap"));
    assert!(rows.iter().all(|row| !row.date.contains("_realistic")));
}

#[test]
fn blank_numeric_cells_in_an_older_log_do_not_abort_the_run() {
    let (_dir, cfg) = workspace();
    write_inputs(&cfg);
    fs::write(
        &cfg.master_log_path,
        "Date,Meeting,Time,EW/Win,Trainer,Jockey,Horse,Odds,SP,Value,Result,Stake,Profit,Running Profit,Best Odds,Running Profit Best Odds\n\
2025-05-01_realistic,York,13:15,Win,C Trainer,C Jockey,Legacy Horse,2.0,,,NR,1.0,,,,\n\
2025-05-02,York,13:15,Win,C Trainer,C Jockey,Old Timer,2.0,2.0,100.0,1,1.0,1.0,1.0,,\n",
    )
    .unwrap();

    let summary = run_settlement(date(), &cfg).unwrap();
    assert_eq!(summary.merge.existing_rows, 2);
    assert_eq!(summary.merge.legacy_rows_dropped, 1);
    assert_eq!(summary.merge.rows_appended, 3);

    let rows = read_master_log(&cfg.master_log_path).unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].horse, "Old Timer");
    assert_eq!(rows[0].profit, 1.0);
    assert_eq!(rows[0].best_odds, 0.0);
    assert_eq!(rows[0].running_profit_best, 0.0);
    assert!(rows.iter().all(|row| !row.is_legacy()));
    assert_eq!(
        header_line(&cfg.master_log_path),
        MASTER_LOG_HEADERS.join(",")
    );
}

#[test]
fn missing_tips_without_a_log_writes_nothing() {
    let (_dir, cfg) = workspace();

    let summary = run_settlement(date(), &cfg).unwrap();
    assert_eq!(summary.tips_loaded, 0);
    assert_eq!(summary.profit, 0.0);
    assert!(!summary.master_log_written);
    assert!(!cfg.master_log_path.exists());
}

#[test]
fn missing_tips_still_purges_legacy_rows_from_an_existing_log() {
    let (_dir, cfg) = workspace();
    write_master_log(
        &cfg.master_log_path,
        &[
            log_row("2025-05-30", "Old Timer", 1.0),
            log_row("2025-05-31_realistic", "Legacy Horse", -1.0),
        ],
    )
    .unwrap();

    let summary = run_settlement(date(), &cfg).unwrap();
    assert!(summary.master_log_written);

    let rows = read_master_log(&cfg.master_log_path).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].horse, "Old Timer");
}

#[test]
fn missing_results_settle_every_tip_as_no_result() {
    let (_dir, cfg) = workspace();
    fs::write(cfg.tips_dir.join("sent_tips_2025-06-01.jsonl"), TIPS).unwrap();

    let summary = run_settlement(date(), &cfg).unwrap();
    assert_eq!(summary.matched, 0);
    assert_eq!(summary.no_result, 3);
    assert_eq!(summary.profit, 0.0);

    let rows = read_master_log(&cfg.master_log_path).unwrap();
    assert!(rows
        .iter()
        .all(|row| row.result == "NR" && row.profit == 0.0 && row.running_profit == 0.0));
}

#[test]
fn stake_scales_every_profit() {
    let (_dir, mut cfg) = workspace();
    write_inputs(&cfg);
    cfg.stake = 2.0;

    let summary = run_settlement(date(), &cfg).unwrap();
    assert_eq!(summary.profit, 6.2);

    let rows = read_master_log(&cfg.master_log_path).unwrap();
    assert_eq!(rows[0].profit, 6.0);
    assert_eq!(rows[0].stake, 2.0);
    assert_eq!(rows[1].profit, 0.2);
}
