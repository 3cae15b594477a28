mod common;

use device_command_pipeline::config::RateLimitConfig;
use device_command_pipeline::dedup::DeduplicationManager;
use device_command_pipeline::rate_limit::{RateLimitWindowRecord, RateLimiter};
use device_command_pipeline::store::KeyValueStoreExt;

#[tokio::test]
async fn test_window_budget_is_shared_across_instances() {
    let env = common::setup();
    let config = RateLimitConfig::new(1, 3);
    // Two app instances, one store.
    let phone = RateLimiter::new(env.store.clone(), env.clock.clone());
    let tablet = RateLimiter::new(env.store.clone(), env.clock.clone());

    assert!(phone.check_rate_limit("user-1", "devices", &config).await.unwrap().allowed);
    assert!(tablet.check_rate_limit("user-1", "devices", &config).await.unwrap().allowed);
    assert!(phone.check_rate_limit("user-1", "devices", &config).await.unwrap().allowed);

    env.clock.advance_millis(15_000);
    let rejected = tablet.check_rate_limit("user-1", "devices", &config).await.unwrap();
    assert!(!rejected.allowed);
    assert_eq!(rejected.suppressed_count, 1);
    assert_eq!(rejected.next_allowed_in, 45_000);

    let record: RateLimitWindowRecord = env
        .store
        .get_json("ratelimit/user-1/devices")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.window_start, common::START_MILLIS);
    assert_eq!(record.count, 4);
    assert_eq!(record.suppressed_count, 1);
}

#[tokio::test]
async fn test_window_rolls_over_at_boundary() {
    let env = common::setup();
    let limiter = RateLimiter::new(env.store.clone(), env.clock.clone());
    let config = RateLimitConfig::new(1, 1);

    assert!(limiter.check_rate_limit("user-1", "wan", &config).await.unwrap().allowed);
    env.clock.advance_millis(59_999);
    assert!(!limiter.check_rate_limit("user-1", "wan", &config).await.unwrap().allowed);

    env.clock.advance_millis(1);
    let decision = limiter.check_rate_limit("user-1", "wan", &config).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.suppressed_count, 0);
}

#[tokio::test]
async fn test_users_and_endpoints_have_independent_budgets() {
    let env = common::setup();
    let limiter = RateLimiter::new(env.store.clone(), env.clock.clone());
    let config = RateLimitConfig::new(1, 1);

    assert!(limiter.check_rate_limit("user-1", "wan", &config).await.unwrap().allowed);
    assert!(!limiter.check_rate_limit("user-1", "wan", &config).await.unwrap().allowed);

    assert!(limiter.check_rate_limit("user-1", "bandwidth", &config).await.unwrap().allowed);
    assert!(limiter.check_rate_limit("user-2", "wan", &config).await.unwrap().allowed);
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_counting() {
    let env = common::setup();
    let limiter = RateLimiter::new(env.store.clone(), env.clock.clone());

    let result = limiter
        .check_rate_limit("user-1", "devices", &RateLimitConfig::new(0, 10))
        .await;
    tokio_test::assert_err!(result);
    let record: Option<RateLimitWindowRecord> =
        env.store.get_json("ratelimit/user-1/devices").await.unwrap();
    assert!(record.is_none());
}

#[test]
fn test_dedup_window_is_per_instance() {
    let env = common::setup();
    let phone = DeduplicationManager::new(env.clock.clone(), 2_000);
    let tablet = DeduplicationManager::new(env.clock.clone(), 2_000);

    assert!(!phone.is_duplicate("stove:ignite"));
    assert!(phone.is_duplicate("stove:ignite"));
    // Cross-instance repeats are left to idempotency keys.
    assert!(!tablet.is_duplicate("stove:ignite"));
}
