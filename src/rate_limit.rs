//! Fixed-window rate limiting per `(user, endpoint)` persisted in the shared store.

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::error::{AppError, Result};
use crate::observability::{get_metrics, mask_sensitive};
use crate::store::{paths, KeyValueStore, KeyValueStoreExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

/// Counter state for one window, at `ratelimit/{user_id}/{endpoint_key}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitWindowRecord {
    pub window_start: i64,
    pub count: u32,
    #[serde(default)]
    pub suppressed_count: u32,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Calls rejected so far in the current window.
    pub suppressed_count: u32,
    /// Milliseconds until the window rolls over; zero when allowed.
    pub next_allowed_in: i64,
}

impl RateLimitDecision {
    /// Converts a rejection into [`AppError::RateLimited`].
    pub fn into_result(self, endpoint_key: &str) -> Result<Self> {
        if self.allowed {
            Ok(self)
        } else {
            Err(AppError::RateLimited {
                endpoint: endpoint_key.to_string(),
                retry_after_ms: self.next_allowed_in,
            })
        }
    }
}

pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Counts one call against the `(user_id, endpoint_key)` window.
    ///
    /// The read-modify-write is not atomic across instances; concurrent
    /// callers may over-admit by a small margin.
    pub async fn check_rate_limit(
        &self,
        user_id: &str,
        endpoint_key: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitDecision> {
        config.validate().map_err(|e| {
            AppError::Validation(format!("Invalid rate limit for '{}': {}", endpoint_key, e))
        })?;

        let path = paths::rate_limit(user_id, endpoint_key);
        let now = self.clock.now_millis();
        let window_ms = config.window_millis();

        let current: Option<RateLimitWindowRecord> = self.store.get_json(&path).await?;

        let (record, decision) = match current {
            Some(record) if now - record.window_start < window_ms => {
                let count = record.count.saturating_add(1);
                if count <= config.max_per_window {
                    (
                        RateLimitWindowRecord { count, ..record },
                        RateLimitDecision {
                            allowed: true,
                            suppressed_count: record.suppressed_count,
                            next_allowed_in: 0,
                        },
                    )
                } else {
                    let suppressed_count = record.suppressed_count.saturating_add(1);
                    (
                        RateLimitWindowRecord {
                            count,
                            suppressed_count,
                            ..record
                        },
                        RateLimitDecision {
                            allowed: false,
                            suppressed_count,
                            next_allowed_in: (record.window_start + window_ms - now).max(0),
                        },
                    )
                }
            }
            _ => (
                RateLimitWindowRecord {
                    window_start: now,
                    count: 1,
                    suppressed_count: 0,
                },
                RateLimitDecision {
                    allowed: true,
                    suppressed_count: 0,
                    next_allowed_in: 0,
                },
            ),
        };

        self.store.set_json(&path, &record).await?;

        if !decision.allowed {
            get_metrics().record_rate_limited(endpoint_key);
            tracing::warn!(
                user_id = %mask_sensitive(user_id, 2),
                endpoint = %endpoint_key,
                suppressed = decision.suppressed_count,
                next_allowed_in_ms = decision.next_allowed_in,
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// Drops the window for `(user_id, endpoint_key)`.
    pub async fn reset(&self, user_id: &str, endpoint_key: &str) -> Result<()> {
        self.store.remove(&paths::rate_limit(user_id, endpoint_key)).await
    }
}
