use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

const COMMANDS: &str = "pipeline_commands_total";
const RETRY_ATTEMPTS: &str = "pipeline_retry_attempts_total";
const OUTBOUND_DURATION: &str = "pipeline_outbound_request_duration_ms";
const RATE_LIMITED: &str = "pipeline_rate_limited_total";
const CACHE_LOOKUPS: &str = "pipeline_cache_lookups_total";
const IDEMPOTENCY_KEYS: &str = "pipeline_idempotency_keys_total";
const DEDUP_SUPPRESSED: &str = "pipeline_dedup_suppressed_total";
const KV_OPERATIONS: &str = "pipeline_kv_operations_total";
const KV_DURATION: &str = "pipeline_kv_operation_duration_ms";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Pipeline counters and histograms.
///
/// Recording before `init_metrics` is a no-op, so library code can record
/// unconditionally and tests need no recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    /// `outcome` is one of `executed`, `suppressed`, `rate_limited` or `failed`.
    pub fn record_command(&self, endpoint: &str, outcome: &str) {
        counter!(COMMANDS, "endpoint" => endpoint.to_string(), "outcome" => outcome.to_string())
            .increment(1);
    }

    pub fn record_retry_attempt(&self, code: &str) {
        counter!(RETRY_ATTEMPTS, "code" => code.to_string()).increment(1);
    }

    pub fn record_outbound_request(&self, duration_ms: f64, outcome: &str) {
        histogram!(OUTBOUND_DURATION, "outcome" => outcome.to_string()).record(duration_ms);
    }

    pub fn record_rate_limited(&self, endpoint: &str) {
        counter!(RATE_LIMITED, "endpoint" => endpoint.to_string()).increment(1);
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        counter!(CACHE_LOOKUPS, "result" => result).increment(1);
    }

    pub fn record_idempotency_key(&self, outcome: &str) {
        counter!(IDEMPOTENCY_KEYS, "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_dedup_suppressed(&self) {
        counter!(DEDUP_SUPPRESSED).increment(1);
    }

    pub fn record_kv_operation(&self, operation: &'static str, duration_ms: f64, success: bool) {
        let status = if success { "ok" } else { "error" };
        counter!(KV_OPERATIONS, "operation" => operation, "status" => status).increment(1);
        histogram!(KV_DURATION, "operation" => operation).record(duration_ms);
    }
}

/// Wall-clock stopwatch for latency histograms and health probes.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder once and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    METRICS.get_or_init(Metrics::new);

    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

fn describe_metrics() {
    describe_counter!(COMMANDS, Unit::Count, "Device commands by endpoint and outcome");
    describe_counter!(RETRY_ATTEMPTS, Unit::Count, "Retries scheduled after transient failures");
    describe_histogram!(OUTBOUND_DURATION, Unit::Milliseconds, "Latency of single outbound attempts");
    describe_counter!(RATE_LIMITED, Unit::Count, "Calls rejected by the rate limiter");
    describe_counter!(CACHE_LOOKUPS, Unit::Count, "Cache lookups by result");
    describe_counter!(IDEMPOTENCY_KEYS, Unit::Count, "Idempotency keys issued or reused");
    describe_counter!(DEDUP_SUPPRESSED, Unit::Count, "Repeated submissions suppressed in-process");
    describe_counter!(KV_OPERATIONS, Unit::Count, "Key-value store operations by status");
    describe_histogram!(KV_DURATION, Unit::Milliseconds, "Key-value store operation latency");
}

pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
