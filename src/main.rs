use device_command_pipeline::clock::SystemClock;
use device_command_pipeline::config::Settings;
use device_command_pipeline::idempotency::{IdempotencyCleanupJob, IdempotencyManager};
use device_command_pipeline::observability::{init_logging, init_metrics, HealthChecker, LogConfig};
use device_command_pipeline::retry::{RetryClient, RetryOptions};
use device_command_pipeline::store::build_store;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;
    init_logging(&LogConfig::from(&settings.logging))?;
    init_metrics()?;
    info!("Configuration loaded");

    // Connect to the shared store
    info!(backend = ?settings.store.backend, "Connecting to key-value store...");
    let store = build_store(&settings.store)?;

    let mut checker = HealthChecker::new(store.clone());
    if let Some(url) = &settings.device_api.health_url {
        let client = RetryClient::new(
            reqwest::Client::new(),
            settings.pipeline.timeouts.clone(),
            RetryOptions::from(&settings.pipeline.retry),
        );
        checker = checker.with_device_api(client, url.as_str());
    }

    let report = checker.check_all().await;
    if report.status.is_unhealthy() {
        error!(?report, "Key-value store is unreachable");
        return Err("key-value store is unreachable".into());
    }
    for dependency in report.dependencies.iter().filter(|d| !d.status.is_healthy()) {
        warn!(name = %dependency.name, message = ?dependency.message, "Dependency degraded");
    }
    info!(status = ?report.status, "Key-value store connection established");

    let manager = Arc::new(IdempotencyManager::new(
        store,
        Arc::new(SystemClock),
        settings.pipeline.idempotency_ttl_ms,
    ));

    info!(
        interval_secs = settings.pipeline.cleanup_interval_secs,
        "Starting idempotency cleanup sweep"
    );
    let sweep = IdempotencyCleanupJob::new(manager, settings.pipeline.cleanup_interval_secs).start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, stopping sweep");
    sweep.abort();

    Ok(())
}
