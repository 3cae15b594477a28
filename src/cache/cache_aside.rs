use crate::clock::Clock;
use crate::error::Result;
use crate::observability::get_metrics;
use crate::store::{paths, KeyValueStore, KeyValueStoreExt};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Lookup counters for one `CacheAside`.
///
/// A lookup ends in exactly one of: a fresh hit, a coalesced hit (another
/// caller filled the entry while this one waited), or a miss that ran the
/// loader.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    coalesced: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of `CacheStats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheSnapshot {
    pub hits: u64,
    pub coalesced: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub errors: u64,
}

impl CacheSnapshot {
    pub fn lookups(&self) -> u64 {
        self.hits + self.coalesced + self.misses
    }

    /// Share of lookups served without running the loader.
    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            n => (self.hits + self.coalesced) as f64 / n as f64,
        }
    }
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        Self::bump(&self.hits);
    }

    pub fn record_coalesced(&self) {
        Self::bump(&self.coalesced);
    }

    pub fn record_miss(&self) {
        Self::bump(&self.misses);
    }

    pub fn record_invalidation(&self) {
        Self::bump(&self.invalidations);
    }

    pub fn record_error(&self) {
        Self::bump(&self.errors);
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Cached value with the time it was fetched, at `cache/{key}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: i64,
}

/// TTL-bounded read-through cache for polling endpoints.
///
/// Fetch failures are never cached. Store failures degrade to a miss so a
/// flaky store never blocks a read.
pub struct CacheAside {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    stats: Arc<CacheStats>,
    fills: DashMap<String, Arc<Mutex<()>>>,
}

impl CacheAside {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, ttl_ms: i64) -> Self {
        Self {
            store,
            clock,
            ttl_ms,
            stats: Arc::new(CacheStats::new()),
            fills: DashMap::new(),
        }
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        self.stats.clone()
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    /// Returns fresh cached data for `key`, or calls `fetch_fn` and stores its result.
    ///
    /// Concurrent callers in this process share a single `fetch_fn` call per key.
    pub async fn get_cached_data<T, F, Fut>(&self, key: &str, fetch_fn: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(data) = self.read_fresh::<T>(key).await {
            self.stats.record_hit();
            get_metrics().record_cache_lookup(true);
            return Ok(data);
        }

        let fill_lock = self
            .fills
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = self.fill(key, &fill_lock, fetch_fn).await;

        // Only the map and this caller hold the lock once no one else waits on it.
        self.fills
            .remove_if(key, |_, lock| Arc::strong_count(lock) <= 2);
        result
    }

    async fn fill<T, F, Fut>(&self, key: &str, fill_lock: &Mutex<()>, fetch_fn: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _guard = fill_lock.lock().await;

        // Another caller may have filled the entry while we waited.
        if let Some(data) = self.read_fresh::<T>(key).await {
            self.stats.record_coalesced();
            get_metrics().record_cache_lookup(true);
            return Ok(data);
        }

        self.stats.record_miss();
        get_metrics().record_cache_lookup(false);

        let data = fetch_fn().await?;
        self.write(key, &data).await;
        Ok(data)
    }

    /// Number of keys with a fill in progress.
    pub fn pending_fills(&self) -> usize {
        self.fills.len()
    }

    /// Force-clears an entry, e.g. on a user-triggered refresh.
    pub async fn invalidate_cache(&self, key: &str) -> Result<()> {
        self.store.remove(&paths::cache(key)).await?;
        self.stats.record_invalidation();
        tracing::debug!(key = %key, "Invalidated cache entry");
        Ok(())
    }

    /// Reads the raw entry without applying the TTL.
    pub async fn peek(&self, key: &str) -> Result<Option<CacheEntry<Value>>> {
        self.store.get_json(&paths::cache(key)).await
    }

    async fn read_fresh<T: DeserializeOwned + Send>(&self, key: &str) -> Option<T> {
        let path = paths::cache(key);

        let raw = match self.store.get(&path).await {
            Ok(raw) => raw?,
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(key = %key, "Cache read failed, treating as miss: {}", e);
                return None;
            }
        };

        let entry: CacheEntry<T> = match serde_json::from_value(raw) {
            Ok(entry) => entry,
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(key = %key, "Dropping undecodable cache entry: {}", e);
                if let Err(e) = self.store.remove(&path).await {
                    tracing::warn!(key = %key, "Failed to drop cache entry: {}", e);
                }
                return None;
            }
        };

        let age = self.clock.now_millis() - entry.timestamp;
        if age < self.ttl_ms {
            tracing::debug!(key = %key, age_ms = age, "Cache hit");
            Some(entry.data)
        } else {
            None
        }
    }

    async fn write<T: Serialize + Sync>(&self, key: &str, data: &T) {
        let entry = CacheEntry {
            data,
            timestamp: self.clock.now_millis(),
        };

        if let Err(e) = self.store.set_json(&paths::cache(key), &entry).await {
            self.stats.record_error();
            tracing::warn!(key = %key, "Cache write failed: {}", e);
        }
    }
}
