//! Document conversion worker.
//!
//! Claims conversion jobs from Redis, converts each document to PDF/A through
//! Gotenberg, moves bytes through S3 and records status in PostgreSQL. Runs
//! until SIGINT or SIGTERM, then drains in-flight work within the grace
//! period.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulse_convert::GotenbergConverter;
use pulse_core::config::mask;
use pulse_core::{Config, DocumentConverter};
use pulse_db::Database;
use pulse_jobs::{Services, WorkerBuilder, WorkerConfig};
use pulse_queue::RedisQueue;
use pulse_storage::S3Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let _file_guard = init_tracing();
    let config = Config::from_env();
    log_config(&config);

    // Queue and status store are required; anything else degrades per job.
    info!("Connecting to Redis...");
    let queue = RedisQueue::connect(&config.redis.connection_url())
        .await
        .context("Failed to connect to Redis")?;

    info!("Connecting to database...");
    let db = Database::connect(&config.database, config.worker_count)
        .await
        .context("Failed to connect to database")?;
    info!("Database connected");

    let converter = GotenbergConverter::new(config.gotenberg_url.clone());
    match converter.health_check().await {
        Ok(true) => info!(url = %config.gotenberg_url, "Gotenberg reachable"),
        _ => warn!(
            url = %config.gotenberg_url,
            "Gotenberg health check failed, conversions will fail until it recovers"
        ),
    }

    let storage = S3Storage::from_config(&config.s3, config.scratch_dir.clone())
        .context("Failed to configure S3 storage")?;

    let services = Services {
        queue: Arc::new(queue),
        converter: Arc::new(converter),
        storage: Arc::new(storage),
        status: Arc::new(db.status.clone()),
    };

    let handle = WorkerBuilder::new(services)
        .with_config(WorkerConfig::from_config(&config))
        .build()
        .start();

    shutdown_signal().await;

    let report = handle.shutdown().await;
    if report.abandoned_retries > 0 {
        error!(
            abandoned = report.abandoned_retries,
            "Scheduled retries were lost during shutdown"
        );
    }
    db.close().await;

    info!("Conversion worker stopped");
    Ok(())
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: "pulse_worker=info,pulse_jobs=info")
///
/// The returned guard must live as long as the process when file logging is
/// enabled.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pulse_worker=info,pulse_jobs=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = std::path::Path::new(path);
        let file_dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("pulse-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

fn log_config(config: &Config) {
    info!(
        workers = config.worker_count,
        pending = %config.queues.pending,
        processing = %config.queues.processing,
        failed = %config.queues.failed,
        redis_db = config.redis.db,
        redis_password = mask(&config.redis.password),
        gotenberg = %config.gotenberg_url,
        bucket = %config.s3.bucket,
        region = %config.s3.region,
        s3_endpoint = config.s3.endpoint.as_deref().unwrap_or("(aws)"),
        s3_secret = mask(&config.s3.secret_key),
        db_host = %config.database.host,
        db_password = mask(&config.database.password),
        scratch_dir = %config.scratch_dir.display(),
        claim_wait_secs = config.claim_wait.as_secs(),
        recovery_interval_secs = config.recovery_interval.as_secs(),
        stale_threshold_secs = config.stale_threshold.as_secs(),
        shutdown_grace_secs = config.shutdown_grace.as_secs(),
        "Conversion worker configured"
    );
    // Per-job values travel in the job; these are only the producer's defaults.
    info!(
        conversion_timeout_secs = config.conversion_timeout.as_secs(),
        max_retries = config.max_retries,
        "Producer defaults"
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
