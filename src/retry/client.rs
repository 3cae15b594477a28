use crate::config::TimeoutSettings;
use crate::error::{AppError, Result};
use crate::observability::{get_metrics, LatencyTimer};
use crate::retry::backoff::RetryOptions;
use crate::retry::error_kind::{FetchError, RetryError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

/// Header carrying the idempotency key on outbound device commands.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Selects the timeout applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestClass {
    #[default]
    General,
    Health,
    Login,
}

impl RequestClass {
    pub fn timeout(&self, timeouts: &TimeoutSettings) -> Duration {
        match self {
            RequestClass::General => timeouts.general(),
            RequestClass::Health => timeouts.health(),
            RequestClass::Login => timeouts.login(),
        }
    }
}

/// Description of an outbound call, rebuilt identically for every attempt.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub class: RequestClass,
    /// Overrides the class timeout when set.
    pub timeout: Option<Duration>,
}

impl OutboundRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            class: RequestClass::General,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn class(mut self, class: RequestClass) -> Self {
        self.class = class;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::Validation(format!("Invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::Validation(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn idempotency_key(self, key: &str) -> Result<Self> {
        self.header(IDEMPOTENCY_KEY_HEADER, key)
    }

    pub fn idempotency_key_value(&self) -> Option<&str> {
        self.headers
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
    }
}

/// HTTP client that retries transient failures with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryClient {
    http: reqwest::Client,
    timeouts: TimeoutSettings,
    defaults: RetryOptions,
}

impl RetryClient {
    pub fn new(http: reqwest::Client, timeouts: TimeoutSettings, defaults: RetryOptions) -> Self {
        Self {
            http,
            timeouts,
            defaults,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            reqwest::Client::new(),
            TimeoutSettings::default(),
            RetryOptions::default(),
        )
    }

    pub fn default_options(&self) -> &RetryOptions {
        &self.defaults
    }

    /// Performs the request, retrying transient failures.
    ///
    /// Attempts are strictly sequential. Returns on the first 2xx response,
    /// fails fast on a permanent error, and otherwise gives up after
    /// `max_attempts` with the last observed error.
    pub async fn retry_fetch(
        &self,
        request: &OutboundRequest,
        options: Option<&RetryOptions>,
    ) -> std::result::Result<reqwest::Response, RetryError> {
        let options = options.unwrap_or(&self.defaults);
        let max_attempts = options.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let err = match self.execute_once(request).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if !err.is_transient() || attempt >= max_attempts {
                if err.is_transient() {
                    tracing::warn!(
                        url = %request.url,
                        attempts = attempt,
                        code = %err.code,
                        "Retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(url = %request.url, code = %err.code, "Permanent error, not retrying");
                }
                return Err(RetryError {
                    attempts: attempt,
                    last_error: err,
                });
            }

            let delay = options.delay_for_attempt(attempt);
            get_metrics().record_retry_attempt(err.code.as_str());
            tracing::warn!(
                url = %request.url,
                attempt = attempt,
                max_attempts = max_attempts,
                code = %err.code,
                delay_ms = delay.as_millis() as u64,
                "Transient failure, backing off"
            );

            if let Some(callback) = &options.on_retry {
                callback(attempt, &err);
            }

            tokio::time::sleep(delay).await;
        }
    }

    /// Retries the request and decodes a JSON success body.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: &OutboundRequest,
        options: Option<&RetryOptions>,
    ) -> Result<T> {
        let response = self.retry_fetch(request, options).await?;
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to read response body: {}", e)))?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn execute_once(
        &self,
        request: &OutboundRequest,
    ) -> std::result::Result<reqwest::Response, FetchError> {
        let timeout = request
            .timeout
            .unwrap_or_else(|| request.class.timeout(&self.timeouts));

        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let timer = LatencyTimer::new();
        let outcome = tokio::time::timeout(timeout, builder.send()).await;
        let duration_ms = timer.elapsed_ms();

        let response = match outcome {
            Err(_) => {
                get_metrics().record_outbound_request(duration_ms, "timeout");
                return Err(FetchError::timeout(format!(
                    "Request timed out after {} ms",
                    timeout.as_millis()
                )));
            }
            Ok(Err(e)) if e.is_timeout() => {
                get_metrics().record_outbound_request(duration_ms, "timeout");
                return Err(FetchError::timeout(e.to_string()));
            }
            Ok(Err(e)) => {
                get_metrics().record_outbound_request(duration_ms, "network_error");
                return Err(FetchError::network(e.to_string()));
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if status.is_success() {
            get_metrics().record_outbound_request(duration_ms, "success");
            return Ok(response);
        }

        get_metrics().record_outbound_request(duration_ms, "error_status");
        let body = response.text().await.unwrap_or_default();
        Err(FetchError::from_response(status.as_u16(), &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_class_timeouts() {
        let timeouts = TimeoutSettings::default();
        assert_eq!(RequestClass::General.timeout(&timeouts), Duration::from_secs(15));
        assert_eq!(RequestClass::Health.timeout(&timeouts), Duration::from_secs(10));
        assert_eq!(RequestClass::Login.timeout(&timeouts), Duration::from_secs(10));
    }

    #[test]
    fn test_outbound_request_builder() {
        let request = OutboundRequest::post("http://localhost/stove/ignite")
            .json(json!({"power": 3}))
            .idempotency_key("7d1f0a8e-2b6c-4f8e-9a51-1c2d3e4f5a6b")
            .unwrap();

        assert_eq!(request.method, Method::POST);
        assert_eq!(
            request.idempotency_key_value(),
            Some("7d1f0a8e-2b6c-4f8e-9a51-1c2d3e4f5a6b")
        );
        assert_eq!(request.body, Some(json!({"power": 3})));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let result = OutboundRequest::get("http://localhost").header("bad header", "x");
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
