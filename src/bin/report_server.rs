use std::sync::Arc;

use axum::Router;
use tipledger::{
    init_logging, log_app_bind, log_app_start, log_source_selected, logging_config_from_env,
    report_router, report_server_config_from_env, storage_config_from_env, CachedLogSource,
    ConfidenceCache, LocalFileSource, MasterLogSource, ReportContext, ReportServerConfig,
    S3ObjectSource,
};

// The blocking S3 client must be created outside the async runtime.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("report_server", &logging_cfg);

    let cfg = report_server_config_from_env()?;
    let source = source_from_env(&cfg)?;

    let data = Arc::new(CachedLogSource::new(source, cfg.refresh_interval_ms));
    let confidence = ConfidenceCache::new(&cfg.tips_dir, cfg.confidence_cache_capacity);
    let context = ReportContext::new(data, confidence)
        .with_roi_stats(&cfg.roi_stats_path, cfg.roi_window_days)
        .with_predictions_dir(&cfg.predictions_dir);
    let app = report_router(Arc::new(context));

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(serve(cfg, app))
}

fn source_from_env(
    cfg: &ReportServerConfig,
) -> Result<Box<dyn MasterLogSource>, Box<dyn std::error::Error>> {
    match storage_config_from_env()? {
        Some(storage) => {
            let source = S3ObjectSource::new(storage)?;
            log_source_selected(&source, cfg.refresh_interval_ms);
            Ok(Box::new(source))
        }
        None => {
            let source = LocalFileSource::new(&cfg.local_log_path);
            log_source_selected(&source, cfg.refresh_interval_ms);
            Ok(Box::new(source))
        }
    }
}

async fn serve(cfg: ReportServerConfig, app: Router) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(cfg.addr).await?;
    let bound_addr = listener.local_addr()?;
    log_app_bind(
        bound_addr,
        &["/report", "/report/summary", "/report/danger-favs"],
    );
    axum::serve(listener, app).await?;

    Ok(())
}
