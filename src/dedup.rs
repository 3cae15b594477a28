//! Best-effort suppression of accidental double submits within one process.
//!
//! This only protects a single process; cross-instance deduplication is the
//! job of [`crate::idempotency::IdempotencyManager`].

use crate::clock::Clock;
use crate::observability::get_metrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const DEFAULT_MAX_ENTRIES: usize = 1_024;

#[derive(Clone)]
pub struct DeduplicationManager {
    in_flight: Arc<DashMap<String, i64>>,
    clock: Arc<dyn Clock>,
    window_ms: i64,
    max_entries: usize,
    /// Map size at which the next sweep of expired entries runs.
    next_purge_at: Arc<AtomicUsize>,
}

impl DeduplicationManager {
    pub fn new(clock: Arc<dyn Clock>, window_ms: i64) -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            clock,
            window_ms,
            max_entries: DEFAULT_MAX_ENTRIES,
            next_purge_at: Arc::new(AtomicUsize::new(DEFAULT_MAX_ENTRIES)),
        }
    }

    /// Expired entries are swept once the map reaches `max_entries`.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self.next_purge_at = Arc::new(AtomicUsize::new(self.max_entries));
        self
    }

    /// Returns `true` if `key` was first seen less than one window ago.
    /// Otherwise marks it in flight, starting a new window, and returns `false`.
    pub fn is_duplicate(&self, key: &str) -> bool {
        // Sweep before taking the entry guard; `retain` locks every shard.
        if self.in_flight.len() >= self.next_purge_at.load(Ordering::Relaxed) {
            self.purge_and_rearm();
        }

        let now = self.clock.now_millis();

        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if now <= *entry.get() {
                    get_metrics().record_dedup_suppressed();
                    tracing::debug!(key = %key, "Suppressed duplicate submission");
                    true
                } else {
                    entry.insert(now + self.window_ms);
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now + self.window_ms);
                false
            }
        }
    }

    /// Read-only check for a live entry.
    pub fn is_in_flight(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        self.in_flight
            .get(key)
            .map(|expires_at| now <= *expires_at)
            .unwrap_or(false)
    }

    pub fn clear(&self, key: &str) {
        self.in_flight.remove(key);
    }

    /// Drops expired entries so long-lived processes do not accumulate keys.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.in_flight.len();
        self.in_flight.retain(|_, expires_at| now <= *expires_at);
        before - self.in_flight.len()
    }

    /// Live entries can keep the map above `max_entries`; the next sweep then
    /// waits until the map doubles so checks stay amortised O(1).
    fn purge_and_rearm(&self) {
        let purged = self.purge_expired();
        let remaining = self.in_flight.len();
        self.next_purge_at
            .store(self.max_entries.max(remaining * 2), Ordering::Relaxed);
        if purged > 0 {
            tracing::debug!(purged, remaining, "Purged expired dedup entries");
        }
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}
