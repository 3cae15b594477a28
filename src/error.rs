use crate::retry::RetryError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Key-value store error: {0}")]
    Store(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Retry(#[from] RetryError),

    #[error("Rate limit exceeded for '{endpoint}', retry in {retry_after_ms} ms")]
    RateLimited { endpoint: String, retry_after_ms: i64 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether a user-initiated retry of the same action could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Retry(err) => err.last_error.is_transient(),
            AppError::RateLimited { .. } | AppError::Store(_) | AppError::Redis(_) => true,
            _ => false,
        }
    }

    /// Suggested wait before the caller tries again, when one is known.
    pub fn retry_after_ms(&self) -> Option<i64> {
        match self {
            AppError::RateLimited { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }
}
