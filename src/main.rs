use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use csv_service::{CsvEngine, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "csv_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CSV Service v{}", env!("CARGO_PKG_VERSION"));

    let config = ServiceConfig::from_env()?;

    info!("Configuration loaded:");
    info!("  Database URL: {}", config.masked_database_url());
    info!("  Notification recipient: {}", config.notification_recipient);
    info!("  Workers: {}", config.worker_count);
    info!("  Queue capacity: {}", config.queue_capacity);
    match config.retry_interval {
        Some(interval) => info!("  Retry interval: {}s", interval.as_secs()),
        None => info!("  Retry interval: disabled"),
    }

    let engine = CsvEngine::from_config(&config).await?;

    // Pick up work left behind by a previous run.
    run_retry_scan(&engine).await;

    info!("CSV Service started successfully");

    match config.retry_interval {
        Some(period) => {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately and the startup scan already ran.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => run_retry_scan(&engine).await,
                    result = signal::ctrl_c() => {
                        log_shutdown_signal(result);
                        break;
                    }
                }
            }
        }
        None => log_shutdown_signal(signal::ctrl_c().await),
    }

    engine.shutdown().await;

    info!("CSV Service shutdown complete");
    Ok(())
}

async fn run_retry_scan(engine: &CsvEngine) {
    match engine.retry_failed().await {
        Ok(report) => {
            for (id, reason) in &report.errors {
                warn!("Table {} could not be resubmitted: {}", id, reason);
            }
        }
        Err(e) => error!("Retry scan for tables failed: {}", e),
    }

    if let Err(e) = engine.retry_pending_changes().await {
        error!("Retry scan for change batches failed: {}", e);
    }
}

fn log_shutdown_signal(result: std::io::Result<()>) {
    match result {
        Ok(()) => info!("Received shutdown signal, gracefully shutting down..."),
        Err(err) => error!("Unable to listen for shutdown signal: {}", err),
    }
}
