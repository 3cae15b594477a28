mod common;

use device_command_pipeline::cache::CacheAside;
use device_command_pipeline::error::AppError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn cache(env: &common::TestEnv) -> Arc<CacheAside> {
    Arc::new(CacheAside::new(env.store.clone(), env.clock.clone(), 60_000))
}

#[tokio::test]
async fn test_fetch_runs_once_per_ttl() {
    let env = common::setup();
    let cache = cache(&env);
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..5 {
        let calls = calls.clone();
        let value: u32 = cache
            .get_cached_data("devices", || async move {
                Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
            })
            .await
            .unwrap();
        assert_eq!(value, 1);
        env.clock.advance_millis(10_000);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // 50s elapsed; the entry expires at 60s.
    env.clock.advance_millis(10_000);
    let calls_after = calls.clone();
    let value: u32 = cache
        .get_cached_data("devices", || async move {
            Ok(calls_after.fetch_add(1, Ordering::SeqCst) + 1)
        })
        .await
        .unwrap();
    assert_eq!(value, 2);
    let snapshot = cache.stats().snapshot();
    assert_eq!(snapshot.hits, 4);
    assert_eq!(snapshot.misses, 2);
    assert_eq!(snapshot.coalesced, 0);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_fetch() {
    let env = common::setup();
    let cache = cache(&env);
    let calls = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let calls = calls.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_cached_data("bandwidth", || async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(format!("reading-{}", calls.fetch_add(1, Ordering::SeqCst)))
                })
                .await
                .unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), "reading-0");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let snapshot = cache.stats().snapshot();
    assert_eq!(snapshot.misses, 1);
    assert_eq!(snapshot.lookups(), 8);
    assert_eq!(cache.pending_fills(), 0);
}

#[tokio::test]
async fn test_fetch_failure_is_not_cached() {
    let env = common::setup();
    let cache = cache(&env);

    let result: Result<u32, AppError> = cache
        .get_cached_data("wan", || async {
            Err(AppError::Validation("device offline".to_string()))
        })
        .await;
    assert!(result.is_err());
    assert!(cache.peek("wan").await.unwrap().is_none());

    let value: u32 = cache.get_cached_data("wan", || async { Ok(3) }).await.unwrap();
    assert_eq!(value, 3);
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let env = common::setup();
    let cache = cache(&env);

    let first: String = cache
        .get_cached_data("lights", || async { Ok("old".to_string()) })
        .await
        .unwrap();
    cache.invalidate_cache("lights").await.unwrap();
    let second: String = cache
        .get_cached_data("lights", || async { Ok("new".to_string()) })
        .await
        .unwrap();

    assert_eq!(first, "old");
    assert_eq!(second, "new");
    assert_eq!(cache.stats().snapshot().invalidations, 1);
}

#[tokio::test]
async fn test_keys_are_independent() {
    let env = common::setup();
    let cache = cache(&env);

    let a: u8 = cache.get_cached_data("a", || async { Ok(1) }).await.unwrap();
    let b: u8 = cache.get_cached_data("b", || async { Ok(2) }).await.unwrap();
    assert_eq!((a, b), (1, 2));
}
