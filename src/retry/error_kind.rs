use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error codes carried in `{ code, error }` payloads from device endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Transient
    NetworkError,
    Timeout,
    ServiceUnavailable,
    ExternalApiError,
    StoveTimeout,
    // Permanent
    ValidationError,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimited,
    StoveOffline,
    MaintenanceRequired,
    HueNotConnected,
    ThermostatNotConnected,
    CameraNotConnected,
    RouterNotConnected,
    DeviceOffline,
    Other(String),
}

impl ErrorCode {
    pub fn parse(code: &str) -> Self {
        match code {
            "NETWORK_ERROR" => ErrorCode::NetworkError,
            "TIMEOUT" => ErrorCode::Timeout,
            "SERVICE_UNAVAILABLE" => ErrorCode::ServiceUnavailable,
            "EXTERNAL_API_ERROR" => ErrorCode::ExternalApiError,
            "STOVE_TIMEOUT" => ErrorCode::StoveTimeout,
            "VALIDATION_ERROR" => ErrorCode::ValidationError,
            "UNAUTHORIZED" => ErrorCode::Unauthorized,
            "FORBIDDEN" => ErrorCode::Forbidden,
            "NOT_FOUND" => ErrorCode::NotFound,
            "RATE_LIMITED" => ErrorCode::RateLimited,
            "STOVE_OFFLINE" => ErrorCode::StoveOffline,
            "MAINTENANCE_REQUIRED" => ErrorCode::MaintenanceRequired,
            "HUE_NOT_CONNECTED" => ErrorCode::HueNotConnected,
            "THERMOSTAT_NOT_CONNECTED" => ErrorCode::ThermostatNotConnected,
            "CAMERA_NOT_CONNECTED" => ErrorCode::CameraNotConnected,
            "ROUTER_NOT_CONNECTED" => ErrorCode::RouterNotConnected,
            "DEVICE_OFFLINE" => ErrorCode::DeviceOffline,
            other => ErrorCode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::ExternalApiError => "EXTERNAL_API_ERROR",
            ErrorCode::StoveTimeout => "STOVE_TIMEOUT",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::StoveOffline => "STOVE_OFFLINE",
            ErrorCode::MaintenanceRequired => "MAINTENANCE_REQUIRED",
            ErrorCode::HueNotConnected => "HUE_NOT_CONNECTED",
            ErrorCode::ThermostatNotConnected => "THERMOSTAT_NOT_CONNECTED",
            ErrorCode::CameraNotConnected => "CAMERA_NOT_CONNECTED",
            ErrorCode::RouterNotConnected => "ROUTER_NOT_CONNECTED",
            ErrorCode::DeviceOffline => "DEVICE_OFFLINE",
            ErrorCode::Other(code) => code,
        }
    }

    /// Transient failures are expected to clear up on their own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkError
                | ErrorCode::Timeout
                | ErrorCode::ServiceUnavailable
                | ErrorCode::ExternalApiError
                | ErrorCode::StoveTimeout
        )
    }

    /// Derives a code for error responses that did not carry one.
    pub fn from_status(status: u16) -> Self {
        match status {
            408 | 504 => ErrorCode::Timeout,
            502 => ErrorCode::ExternalApiError,
            503 => ErrorCode::ServiceUnavailable,
            429 => ErrorCode::RateLimited,
            401 | 403 => ErrorCode::Unauthorized,
            400 | 422 => ErrorCode::ValidationError,
            404 => ErrorCode::NotFound,
            other => ErrorCode::Other(format!("HTTP_{}", other)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns `true` exactly for the transient error codes. Unknown codes are permanent.
pub fn is_transient_error(code: &str) -> bool {
    ErrorCode::parse(code).is_transient()
}

/// Error body returned by device-command endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: Option<String>,
    pub error: Option<String>,
}

/// A single failed outbound attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct FetchError {
    /// HTTP status when a response was received.
    pub status: Option<u16>,
    pub code: ErrorCode,
    pub message: String,
}

impl FetchError {
    pub fn new(status: Option<u16>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn from_code(status: Option<u16>, code: &str, message: impl Into<String>) -> Self {
        Self::new(status, ErrorCode::parse(code), message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(None, ErrorCode::NetworkError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(None, ErrorCode::Timeout, message)
    }

    /// Builds an error from a non-2xx response body.
    pub fn from_response(status: u16, body: &str) -> Self {
        let payload: ErrorPayload = serde_json::from_str(body).unwrap_or_default();
        let code = payload
            .code
            .as_deref()
            .map(ErrorCode::parse)
            .unwrap_or_else(|| ErrorCode::from_status(status));
        let message = payload
            .error
            .unwrap_or_else(|| format!("Request failed with status {}", status));

        Self::new(Some(status), code, message)
    }

    pub fn is_transient(&self) -> bool {
        self.code.is_transient()
    }
}

/// Returned by `retry_fetch` once it gives up.
#[derive(Debug, Clone, Error)]
#[error("Request failed after {attempts} attempt(s): {last_error}")]
pub struct RetryError {
    pub attempts: u32,
    pub last_error: FetchError,
}
