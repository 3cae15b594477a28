//! Readiness of the pipeline's collaborators.
//!
//! The shared store is mandatory: without it no idempotency key can be
//! issued, so an unreachable store makes the process unready. The device API
//! is optional and can only degrade the report.

use crate::observability::LatencyTimer;
use crate::retry::{OutboundRequest, RequestClass, RetryClient, RetryOptions};
use crate::store::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

const STORE_PING_TIMEOUT: Duration = Duration::from_secs(5);
const STORE_SLOW_MS: f64 = 50.0;
const DEVICE_API_SLOW_MS: f64 = 1_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }

    pub fn is_degraded(&self) -> bool {
        *self == HealthStatus::Degraded
    }

    pub fn is_unhealthy(&self) -> bool {
        *self == HealthStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: Option<f64>,
    pub message: Option<String>,
}

impl DependencyHealth {
    pub fn healthy(name: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            latency_ms: None,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(message.into()),
        }
    }

    /// A successful probe that took longer than `slow_ms`.
    fn timed(name: &str, latency_ms: f64, slow_ms: f64) -> Self {
        if latency_ms > slow_ms {
            Self {
                latency_ms: Some(latency_ms),
                ..Self::degraded(name, format!("Slow response ({:.0} ms)", latency_ms))
            }
        } else {
            Self::healthy(name, latency_ms)
        }
    }
}

/// Health of every probed dependency; the overall status is the worst one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: Vec<DependencyHealth>,
}

impl HealthReport {
    pub fn new(version: String, uptime_seconds: u64, dependencies: Vec<DependencyHealth>) -> Self {
        let status = dependencies
            .iter()
            .map(|d| d.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            version,
            uptime_seconds,
            dependencies,
        }
    }
}

struct DeviceApiProbe {
    client: RetryClient,
    url: String,
}

pub struct HealthChecker {
    store: Arc<dyn KeyValueStore>,
    device_api: Option<DeviceApiProbe>,
    started: Instant,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            device_api: None,
            started: Instant::now(),
        }
    }

    /// Also probes `url` with a single GET under the health timeout.
    pub fn with_device_api(mut self, client: RetryClient, url: impl Into<String>) -> Self {
        self.device_api = Some(DeviceApiProbe {
            client,
            url: url.into(),
        });
        self
    }

    pub async fn check_all(&self) -> HealthReport {
        let mut dependencies = vec![self.check_store().await];
        if let Some(device_api) = self.check_device_api().await {
            dependencies.push(device_api);
        }

        HealthReport::new(
            env!("CARGO_PKG_VERSION").to_string(),
            self.uptime_seconds(),
            dependencies,
        )
    }

    pub async fn check_store(&self) -> DependencyHealth {
        let timer = LatencyTimer::new();

        match tokio::time::timeout(STORE_PING_TIMEOUT, self.store.ping()).await {
            Ok(Ok(())) => DependencyHealth::timed("store", timer.elapsed_ms(), STORE_SLOW_MS),
            Ok(Err(e)) => DependencyHealth::unhealthy("store", format!("Ping failed: {}", e)),
            Err(_) => DependencyHealth::unhealthy(
                "store",
                format!("No answer within {} s", STORE_PING_TIMEOUT.as_secs()),
            ),
        }
    }

    /// `None` when no device API probe is configured.
    pub async fn check_device_api(&self) -> Option<DependencyHealth> {
        let probe = self.device_api.as_ref()?;
        let request = OutboundRequest::get(probe.url.as_str()).class(RequestClass::Health);
        let once = RetryOptions::default().with_max_attempts(1);
        let timer = LatencyTimer::new();

        let health = match probe.client.retry_fetch(&request, Some(&once)).await {
            Ok(_) => DependencyHealth::timed("device_api", timer.elapsed_ms(), DEVICE_API_SLOW_MS),
            Err(e) => DependencyHealth::degraded("device_api", e.last_error.to_string()),
        };
        Some(health)
    }

    pub fn is_alive(&self) -> bool {
        true
    }

    /// Commands must not run without the store.
    pub async fn is_ready(&self) -> bool {
        !self.check_store().await.status.is_unhealthy()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}
