use device_command_pipeline::config::LoggingSettings;
use device_command_pipeline::observability::{
    mask_key, mask_sensitive, HealthReport, DependencyHealth, HealthChecker, HealthStatus,
    LatencyTimer, LogConfig, LogFormat, Metrics,
};
use device_command_pipeline::config::TimeoutSettings;
use device_command_pipeline::retry::{RetryClient, RetryOptions};
use device_command_pipeline::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn probe_client() -> RetryClient {
    RetryClient::new(
        reqwest::Client::new(),
        TimeoutSettings {
            general_ms: 300,
            health_ms: 300,
            login_ms: 300,
        },
        RetryOptions::default().with_delays(Duration::from_millis(5), Duration::from_millis(20)),
    )
}

#[test]
fn test_log_config_default() {
    let config = LogConfig::default();
    assert_eq!(config.level, "info");
    assert!(config.include_target);
    assert!(!config.include_file);
    assert!(!config.include_line);
}

#[test]
fn test_log_config_from_settings() {
    let settings = LoggingSettings {
        level: "debug".to_string(),
        format: "JSON".to_string(),
    };
    let config = LogConfig::from(&settings);
    assert_eq!(config.level, "debug");
    assert_eq!(config.format, LogFormat::Json);
    assert!(config.include_target);
}

#[test]
fn test_log_format_from_str() {
    assert_eq!(LogFormat::from("json"), LogFormat::Json);
    assert_eq!(LogFormat::from("compact"), LogFormat::Compact);
    assert_eq!(LogFormat::from("COMPACT"), LogFormat::Compact);
    assert_eq!(LogFormat::from("unknown"), LogFormat::Pretty);
}

#[test]
fn test_mask_sensitive() {
    assert_eq!(mask_sensitive("abc", 2), "***");
    assert_eq!(mask_sensitive("1234", 2), "****");
    assert_eq!(mask_sensitive("1234567890", 2), "12******90");
}

#[test]
fn test_mask_key_keeps_idempotency_key_ends() {
    let masked = mask_key("550e8400-e29b-41d4-a716-446655440000");
    assert!(masked.starts_with("550e"));
    assert!(masked.ends_with("0000"));
    assert_eq!(masked.chars().count(), 36);
    assert!(!masked.contains("e29b"));
}

#[test]
fn test_metrics_recording_without_recorder() {
    let metrics = Metrics::new();
    metrics.record_command("devices", "executed");
    metrics.record_command("devices", "suppressed");
    metrics.record_retry_attempt("STOVE_TIMEOUT");
    metrics.record_outbound_request(42.0, "success");
    metrics.record_rate_limited("wan");
    metrics.record_cache_lookup(true);
    metrics.record_cache_lookup(false);
    metrics.record_idempotency_key("issued");
    metrics.record_dedup_suppressed();
    metrics.record_kv_operation("get", 0.4, true);
}

#[test]
fn test_latency_timer() {
    let timer = LatencyTimer::new();
    std::thread::sleep(std::time::Duration::from_millis(10));
    let elapsed = timer.elapsed_ms();
    assert!(elapsed >= 10.0);
    assert!(elapsed < 1000.0);
}

#[test]
fn test_health_status_checks() {
    assert!(HealthStatus::Healthy.is_healthy());
    assert!(HealthStatus::Degraded.is_degraded());
    assert!(HealthStatus::Unhealthy.is_unhealthy());
    assert!(!HealthStatus::Degraded.is_unhealthy());
}

#[test]
fn test_health_report_takes_worst_status() {
    let health = HealthReport::new(
        "0.1.0".to_string(),
        60,
        vec![
            DependencyHealth::healthy("store", 1.0),
            DependencyHealth::degraded("device_api", "Slow"),
        ],
    );
    assert_eq!(health.status, HealthStatus::Degraded);

    let health = HealthReport::new(
        "0.1.0".to_string(),
        60,
        vec![
            DependencyHealth::degraded("store", "Slow"),
            DependencyHealth::unhealthy("device_api", "Connection refused"),
        ],
    );
    assert_eq!(health.status, HealthStatus::Unhealthy);

    let health = HealthReport::new("0.1.0".to_string(), 0, vec![]);
    assert_eq!(health.status, HealthStatus::Healthy);
}

#[test]
fn test_health_serialization() {
    let health = HealthReport::new(
        "0.1.0".to_string(),
        100,
        vec![DependencyHealth::healthy("store", 5.5)],
    );
    let json = serde_json::to_string(&health).unwrap();

    assert!(json.contains("\"status\":\"healthy\""));
    assert!(json.contains("\"uptime_seconds\":100"));
    assert!(json.contains("\"name\":\"store\""));
    assert!(json.contains("\"latency_ms\":5.5"));
}

#[tokio::test]
async fn test_health_checker_with_memory_store() {
    let checker = HealthChecker::new(Arc::new(MemoryStore::new()));
    let health = checker.check_all().await;

    assert!(!health.status.is_unhealthy());
    assert_eq!(health.dependencies.len(), 1);
    assert_eq!(health.dependencies[0].name, "store");
    assert!(checker.is_alive());
    assert!(checker.is_ready().await);
}

#[tokio::test]
async fn test_device_api_probe_healthy() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let checker = HealthChecker::new(Arc::new(MemoryStore::new()))
        .with_device_api(probe_client(), format!("{}/health", mock_server.uri()));
    let report = checker.check_all().await;

    assert_eq!(report.dependencies.len(), 2);
    assert_eq!(report.dependencies[1].name, "device_api");
    assert!(report.dependencies[1].latency_ms.is_some());
    assert!(!report.status.is_unhealthy());
}

#[tokio::test]
async fn test_device_api_outage_only_degrades() {
    let mock_server = MockServer::start().await;
    // A single probe, no retries.
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let checker = HealthChecker::new(Arc::new(MemoryStore::new()))
        .with_device_api(probe_client(), format!("{}/health", mock_server.uri()));
    let device_api = checker.check_device_api().await.unwrap();

    assert_eq!(device_api.status, HealthStatus::Degraded);
    assert!(device_api.message.is_some());
    assert!(checker.is_ready().await);
}
