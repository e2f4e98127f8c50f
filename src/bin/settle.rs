use tipledger::{
    init_logging, log_app_start, log_settle_summary, logging_config_from_env, parse_run_date,
    run_settlement, settlement_config_from_env,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("settle", &logging_cfg);

    let date_arg = date_argument(std::env::args().skip(1))
        .ok_or("usage: settle <YYYY-MM-DD> (or --date <YYYY-MM-DD>)")?;
    let date = parse_run_date(&date_arg)?;
    let cfg = settlement_config_from_env()?;

    let summary = run_settlement(date, &cfg)?;
    log_settle_summary(&summary);
    println!(
        "Updated master log {}: {} tips, {} matched, profit {:.2} (best odds {:.2}), {} rows replaced",
        cfg.master_log_path.display(),
        summary.tips_loaded,
        summary.matched,
        summary.profit,
        summary.profit_best,
        summary.merge.rows_replaced
    );

    Ok(())
}

fn date_argument(mut args: impl Iterator<Item = String>) -> Option<String> {
    let first = args.next()?;
    match first.as_str() {
        "--date" => args.next(),
        _ => match first.strip_prefix("--date=") {
            Some(value) => Some(value.to_string()),
            None => Some(first),
        },
    }
}
