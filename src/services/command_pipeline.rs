use crate::cache::CacheAside;
use crate::clock::Clock;
use crate::config::{PipelineConfig, RateLimitConfig, Settings};
use crate::dedup::DeduplicationManager;
use crate::error::{AppError, Result};
use crate::idempotency::{IdempotencyManager, KeyRegistration};
use crate::observability::{get_metrics, mask_key};
use crate::rate_limit::RateLimiter;
use crate::retry::{OutboundRequest, RequestClass, RetryClient, RetryOptions};
use crate::store::KeyValueStore;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A write command for a physical device.
#[derive(Debug, Clone)]
pub struct DeviceCommand {
    /// Rate-limit class, e.g. `devices`.
    pub endpoint_key: String,
    /// Logical endpoint used for fingerprinting, e.g. `/api/stove/ignite`.
    pub endpoint: String,
    pub url: String,
    pub method: Method,
    pub body: Value,
    /// UI-level action id for double-submit suppression. Derived from the
    /// user and fingerprint when absent.
    pub dedup_key: Option<String>,
}

impl DeviceCommand {
    pub fn post(
        endpoint_key: impl Into<String>,
        endpoint: impl Into<String>,
        url: impl Into<String>,
        body: Value,
    ) -> Self {
        Self {
            endpoint_key: endpoint_key.into(),
            endpoint: endpoint.into(),
            url: url.into(),
            method: Method::POST,
            body,
            dedup_key: None,
        }
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }
}

/// A read against a polling endpoint.
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub endpoint_key: String,
    pub cache_key: String,
    pub url: String,
    pub class: RequestClass,
}

impl PollRequest {
    pub fn new(
        endpoint_key: impl Into<String>,
        cache_key: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_key: endpoint_key.into(),
            cache_key: cache_key.into(),
            url: url.into(),
            class: RequestClass::General,
        }
    }

    pub fn class(mut self, class: RequestClass) -> Self {
        self.class = class;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// Dropped as an accidental repeat within the dedup window.
    Suppressed { dedup_key: String },
    /// Delivered to the device endpoint.
    Executed {
        idempotency_key: String,
        reused_key: bool,
        status: u16,
        body: Value,
    },
}

impl CommandOutcome {
    pub fn is_suppressed(&self) -> bool {
        matches!(self, CommandOutcome::Suppressed { .. })
    }
}

/// Composes dedup, idempotency, rate limiting, retry and caching around
/// outbound device calls.
pub struct CommandPipeline {
    dedup: DeduplicationManager,
    idempotency: Arc<IdempotencyManager>,
    rate_limiter: RateLimiter,
    cache: CacheAside,
    retry: RetryClient,
    rate_limits: HashMap<String, RateLimitConfig>,
}

impl CommandPipeline {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: &PipelineConfig,
        rate_limits: HashMap<String, RateLimitConfig>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            dedup: DeduplicationManager::new(clock.clone(), config.dedup_window_ms)
                .with_max_entries(config.dedup_max_entries),
            idempotency: Arc::new(IdempotencyManager::new(
                store.clone(),
                clock.clone(),
                config.idempotency_ttl_ms,
            )),
            rate_limiter: RateLimiter::new(store.clone(), clock.clone()),
            cache: CacheAside::new(store, clock, config.cache_ttl_ms),
            retry: RetryClient::new(
                http,
                config.timeouts.clone(),
                RetryOptions::from(&config.retry),
            ),
            rate_limits,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(
            store,
            clock,
            &settings.pipeline,
            settings.rate_limits.clone(),
            reqwest::Client::new(),
        )
    }

    pub fn idempotency(&self) -> Arc<IdempotencyManager> {
        Arc::clone(&self.idempotency)
    }

    pub fn dedup(&self) -> &DeduplicationManager {
        &self.dedup
    }

    pub fn cache(&self) -> &CacheAside {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn retry_client(&self) -> &RetryClient {
        &self.retry
    }

    pub fn rate_limit_for(&self, endpoint_key: &str) -> RateLimitConfig {
        self.rate_limits
            .get(endpoint_key)
            .copied()
            .unwrap_or_default()
    }

    /// Sends a device command.
    ///
    /// Immediate repeats are suppressed in-process, the command is bound to
    /// an idempotency key before it is admitted by the rate limiter, and the
    /// call is retried on transient failures. On failure the dedup entry is
    /// cleared so the user can retry manually right away.
    pub async fn send_command(&self, user_id: &str, command: &DeviceCommand) -> Result<CommandOutcome> {
        let dedup_key = match &command.dedup_key {
            Some(key) => key.clone(),
            None => {
                let fingerprint = self.idempotency.fingerprint(&command.endpoint, &command.body);
                format!("{}:{}", user_id, fingerprint.lookup_id())
            }
        };

        if self.dedup.is_duplicate(&dedup_key) {
            get_metrics().record_command(&command.endpoint_key, "suppressed");
            return Ok(CommandOutcome::Suppressed { dedup_key });
        }

        let result = self.execute_command(user_id, command).await;

        match &result {
            Ok(_) => get_metrics().record_command(&command.endpoint_key, "executed"),
            Err(e) => {
                self.dedup.clear(&dedup_key);
                let outcome = match e {
                    AppError::RateLimited { .. } => "rate_limited",
                    _ => "failed",
                };
                get_metrics().record_command(&command.endpoint_key, outcome);
                tracing::warn!(
                    endpoint = %command.endpoint,
                    retryable = e.is_retryable(),
                    "Device command failed: {}",
                    e
                );
            }
        }

        result
    }

    async fn execute_command(&self, user_id: &str, command: &DeviceCommand) -> Result<CommandOutcome> {
        let registration: KeyRegistration = self
            .idempotency
            .register_key(&command.endpoint, &command.body)
            .await?;

        let limit = self.rate_limit_for(&command.endpoint_key);
        self.rate_limiter
            .check_rate_limit(user_id, &command.endpoint_key, &limit)
            .await?
            .into_result(&command.endpoint_key)?;

        let request = OutboundRequest::new(command.method.clone(), command.url.as_str())
            .json(command.body.clone())
            .idempotency_key(&registration.key)?;

        let response = self.retry.retry_fetch(&request, None).await?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to read command response: {}", e)))?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        let reused_key = registration.is_reused();
        tracing::info!(
            endpoint = %command.endpoint,
            key = %mask_key(&registration.key),
            reused_key,
            status = status,
            "Device command delivered"
        );

        Ok(CommandOutcome::Executed {
            idempotency_key: registration.key,
            reused_key,
            status,
            body,
        })
    }

    /// Reads a polling endpoint through the rate limiter and the cache.
    pub async fn poll<T>(&self, user_id: &str, request: &PollRequest) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        let limit = self.rate_limit_for(&request.endpoint_key);
        self.rate_limiter
            .check_rate_limit(user_id, &request.endpoint_key, &limit)
            .await?
            .into_result(&request.endpoint_key)?;

        let outbound = OutboundRequest::get(request.url.as_str()).class(request.class);
        self.cache
            .get_cached_data(&request.cache_key, || self.retry.fetch_json::<T>(&outbound, None))
            .await
    }

    /// Drops the cached value so the next poll hits the device API.
    pub async fn refresh(&self, cache_key: &str) -> Result<()> {
        self.cache.invalidate_cache(cache_key).await
    }
}
