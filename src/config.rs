use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitConfig>,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub device_api: DeviceApiSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub redis_url: String,
    pub key_prefix: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "home".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceApiSettings {
    /// Probed by the startup health check when set.
    pub health_url: Option<String>,
}

/// Tuning constants shared by every pipeline component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub idempotency_ttl_ms: i64,
    pub dedup_window_ms: i64,
    /// Dedup map size that triggers a sweep of expired entries.
    pub dedup_max_entries: usize,
    pub cache_ttl_ms: i64,
    pub cleanup_interval_secs: u64,
    pub retry: RetrySettings,
    pub timeouts: TimeoutSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            idempotency_ttl_ms: 3_600_000, // 1 hour
            dedup_window_ms: 2_000,
            dedup_max_entries: 1_024,
            cache_ttl_ms: 60_000,
            cleanup_interval_secs: 300,
            retry: RetrySettings::default(),
            timeouts: TimeoutSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Multiplicative jitter applied to each delay, 0.3 means +/-30%.
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter_factor: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub general_ms: u64,
    pub health_ms: u64,
    pub login_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            general_ms: 15_000,
            health_ms: 10_000,
            login_ms: 10_000,
        }
    }
}

impl TimeoutSettings {
    pub fn general(&self) -> Duration {
        Duration::from_millis(self.general_ms)
    }

    pub fn health(&self) -> Duration {
        Duration::from_millis(self.health_ms)
    }

    pub fn login(&self) -> Duration {
        Duration::from_millis(self.login_ms)
    }
}

/// Fixed-window budget for one endpoint class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct RateLimitConfig {
    #[validate(range(min = 1))]
    pub window_minutes: u32,
    #[validate(range(min = 1))]
    pub max_per_window: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_minutes: 1,
            max_per_window: 10,
        }
    }
}

impl RateLimitConfig {
    pub fn new(window_minutes: u32, max_per_window: u32) -> Self {
        Self {
            window_minutes,
            max_per_window,
        }
    }

    pub fn window_millis(&self) -> i64 {
        i64::from(self.window_minutes) * 60_000
    }
}

impl Settings {
    pub fn new() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        for (endpoint, limit) in &self.rate_limits {
            limit.validate().map_err(|e| {
                AppError::Validation(format!("Invalid rate limit for '{}': {}", endpoint, e))
            })?;
        }

        if self.pipeline.retry.max_attempts == 0 {
            return Err(AppError::Validation(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.pipeline.retry.jitter_factor) {
            return Err(AppError::Validation(
                "retry.jitter_factor must be in [0, 1)".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the limit for an endpoint class, falling back to the default budget.
    pub fn rate_limit_for(&self, endpoint_key: &str) -> RateLimitConfig {
        self.rate_limits
            .get(endpoint_key)
            .copied()
            .unwrap_or_default()
    }
}
