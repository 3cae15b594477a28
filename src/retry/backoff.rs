use crate::config::RetrySettings;
use crate::retry::error_kind::FetchError;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Invoked before each backoff wait with the 1-based attempt that just failed.
pub type OnRetry = Arc<dyn Fn(u32, &FetchError) + Send + Sync>;

/// Retry policy for a single `retry_fetch` call.
#[derive(Clone)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub on_retry: Option<OnRetry>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryOptions {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter_factor: settings.jitter_factor,
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter_factor", &self.jitter_factor)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryOptions {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    pub fn on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32, &FetchError) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    /// Delay before retrying after `attempt` (1-based) failed, without jitter.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let initial_ms = self.initial_delay.as_millis() as u64;
        let delay_ms = initial_ms.saturating_mul(1_u64 << exp);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    /// Capped exponential delay with uniform multiplicative jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        if self.jitter_factor <= 0.0 {
            return base;
        }

        let factor = rand::thread_rng()
            .gen_range((1.0 - self.jitter_factor)..=(1.0 + self.jitter_factor));
        base.mul_f64(factor.max(0.0))
    }
}
