#![allow(dead_code)]

use device_command_pipeline::clock::ManualClock;
use device_command_pipeline::config::{PipelineConfig, RateLimitConfig};
use device_command_pipeline::services::CommandPipeline;
use device_command_pipeline::store::MemoryStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// 2026-01-18T12:00:00Z
pub const START_MILLIS: i64 = 1_768_737_600_000;

pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

pub fn setup() -> TestEnv {
    TestEnv {
        store: Arc::new(MemoryStore::new()),
        clock: Arc::new(ManualClock::new(START_MILLIS)),
    }
}

/// Pipeline settings with short backoff so retry tests run fast.
pub fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.retry.initial_delay_ms = 10;
    config.retry.max_delay_ms = 40;
    config.timeouts.general_ms = 500;
    config
}

pub fn pipeline(env: &TestEnv, rate_limits: HashMap<String, RateLimitConfig>) -> CommandPipeline {
    CommandPipeline::new(
        env.store.clone(),
        env.clock.clone(),
        &fast_config(),
        rate_limits,
        reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client"),
    )
}
