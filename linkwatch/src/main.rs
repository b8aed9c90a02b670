use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use linkwatch::checker::{Checker, HttpProber};
use linkwatch::config::AppConfig;
use linkwatch::database::{self, repositories::SqlxTargetRepository};
use linkwatch::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = logging::init_logging(config.log_dir.as_deref())?;
    info!(?config, "linkwatch starting");

    // Initialize database
    let pool = database::init_pool(&config.database_url)
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))?;

    // Run migrations
    database::run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    let repository = Arc::new(SqlxTargetRepository::new(pool.clone()));
    let prober = Arc::new(HttpProber::new(config.http_timeout)?);
    info!(timeout = ?prober.timeout(), "HTTP prober ready");

    let checker = Checker::new(config.checker_config(), repository, prober)?;
    checker.start();

    shutdown_signal().await;
    info!(in_flight = checker.in_flight(), "Stopping checker");

    let report = checker.shutdown(config.shutdown_grace).await;
    let stats = checker.stats();
    if report.is_clean() {
        info!(
            passes = stats.passes,
            results_written = stats.results_written,
            "linkwatch stopped cleanly"
        );
    } else {
        warn!(
            abandoned = report.abandoned,
            results_written = stats.results_written,
            "linkwatch stopped before all probes finished"
        );
    }

    pool.close().await;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
