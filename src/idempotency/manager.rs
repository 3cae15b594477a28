use crate::clock::Clock;
use crate::error::{AppError, Result};
use crate::idempotency::key_generator::{generate_key, Fingerprint, IdempotencyKeyGenerator};
use crate::idempotency::storage::{IdempotencyKeyRecord, IdempotencyRepository, LookupRecord};
use crate::observability::{get_metrics, mask_sensitive};
use crate::store::KeyValueStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const MAX_REGISTRATION_ATTEMPTS: u32 = 5;

/// How long a replacement claim blocks other instances before it is presumed abandoned.
const REPLACEMENT_LEASE_MS: i64 = 30_000;

/// Counters for key issuance.
#[derive(Debug, Default)]
pub struct IdempotencyMetrics {
    pub total_requests: AtomicU64,
    pub issued_keys: AtomicU64,
    pub reused_keys: AtomicU64,
    pub lost_races: AtomicU64,
    pub swept_keys: AtomicU64,
}

impl IdempotencyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_issued(&self) {
        self.issued_keys.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reused(&self) {
        self.reused_keys.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lost_race(&self) {
        self.lost_races.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_swept(&self, count: u64) {
        self.swept_keys.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            issued_keys: self.issued_keys.load(Ordering::Relaxed),
            reused_keys: self.reused_keys.load(Ordering::Relaxed),
            lost_races: self.lost_races.load(Ordering::Relaxed),
            swept_keys: self.swept_keys.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub issued_keys: u64,
    pub reused_keys: u64,
    pub lost_races: u64,
    pub swept_keys: u64,
}

impl MetricsSnapshot {
    pub fn reuse_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.reused_keys as f64 / self.total_requests as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyOutcome {
    /// A new key was minted for this fingerprint.
    Issued,
    /// A live key already existed; the request is a retry of the same command.
    Reused,
}

/// Result of [`IdempotencyManager::register_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRegistration {
    pub key: String,
    pub outcome: KeyOutcome,
    pub expires_at: i64,
}

impl KeyRegistration {
    pub fn is_reused(&self) -> bool {
        self.outcome == KeyOutcome::Reused
    }
}

/// Cross-instance idempotency key issuance backed by the shared store.
pub struct IdempotencyManager {
    repo: IdempotencyRepository,
    generator: IdempotencyKeyGenerator,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    metrics: Arc<IdempotencyMetrics>,
}

impl IdempotencyManager {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, ttl_ms: i64) -> Self {
        Self {
            repo: IdempotencyRepository::new(store),
            generator: IdempotencyKeyGenerator::new(),
            clock,
            ttl_ms,
            metrics: Arc::new(IdempotencyMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<IdempotencyMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    /// Mints a fresh key without registering it.
    pub fn generate_key(&self) -> String {
        generate_key()
    }

    pub fn fingerprint(&self, endpoint: &str, body: &Value) -> Fingerprint {
        self.generator.fingerprint(endpoint, body)
    }

    /// Returns the live key for `(endpoint, body)`, minting one if needed.
    ///
    /// The lookup record is claimed with a conditional write, so concurrent
    /// registrations of the same fingerprint converge on one key. Store
    /// failures propagate: a command must not proceed without a key.
    pub async fn register_key(&self, endpoint: &str, body: &Value) -> Result<KeyRegistration> {
        self.metrics.record_request();
        let fingerprint = self.generator.fingerprint(endpoint, body);

        for attempt in 1..=MAX_REGISTRATION_ATTEMPTS {
            let now = self.clock.now_millis();

            if let Some(existing) = self.repo.find_lookup(&fingerprint).await? {
                if !existing.is_expired_at(now) {
                    self.metrics.record_reused();
                    get_metrics().record_idempotency_key("reused");
                    tracing::debug!(
                        endpoint = %endpoint,
                        key = %mask_sensitive(&existing.key, 4),
                        "Reusing live idempotency key"
                    );
                    return Ok(KeyRegistration {
                        key: existing.key,
                        outcome: KeyOutcome::Reused,
                        expires_at: existing.expires_at,
                    });
                }

                // Stale lookup left behind by an expired key. Only the instance
                // holding the replacement claim may delete it.
                if !self.claim_stale_lookup(&fingerprint, &existing.key, now).await? {
                    self.metrics.record_lost_race();
                    tracing::debug!(endpoint = %endpoint, "Stale lookup is being replaced elsewhere, re-reading");
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                    continue;
                }
            }

            let record = IdempotencyKeyRecord::new(generate_key(), &fingerprint, now, self.ttl_ms);
            let lookup = LookupRecord::for_record(&record);

            if !self.repo.try_insert_lookup(&fingerprint, &lookup).await? {
                self.metrics.record_lost_race();
                tracing::debug!(endpoint = %endpoint, "Lost idempotency registration race, re-reading");
                continue;
            }

            if let Err(e) = self.repo.insert_key(&record).await {
                if let Err(cleanup) = self.repo.remove_lookup(&fingerprint).await {
                    tracing::error!(
                        endpoint = %endpoint,
                        "Failed to roll back idempotency lookup: {}",
                        cleanup
                    );
                }
                return Err(e);
            }

            self.metrics.record_issued();
            get_metrics().record_idempotency_key("issued");
            tracing::info!(
                endpoint = %endpoint,
                key = %mask_sensitive(&record.key, 4),
                expires_at = record.expires_at,
                "Issued idempotency key"
            );

            return Ok(KeyRegistration {
                key: record.key,
                outcome: KeyOutcome::Issued,
                expires_at: record.expires_at,
            });
        }

        Err(AppError::Conflict(format!(
            "Could not register idempotency key for '{}' after {} attempts",
            endpoint, MAX_REGISTRATION_ATTEMPTS
        )))
    }

    /// Registers any serializable request body.
    pub async fn register<T: Serialize>(&self, endpoint: &str, body: &T) -> Result<KeyRegistration> {
        let value = serde_json::to_value(body)?;
        self.register_key(endpoint, &value).await
    }

    /// Looks up a live key record, e.g. to recognise a replayed command.
    pub async fn find_key(&self, key: &str) -> Result<Option<IdempotencyKeyRecord>> {
        let now = self.clock.now_millis();
        Ok(self
            .repo
            .find_key(key)
            .await?
            .filter(|record| !record.is_expired_at(now)))
    }

    /// Deletes every key record with `now > expires_at` and returns how many were removed.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let now = self.clock.now_millis();
        let mut removed = 0u64;

        for record in self.repo.list_keys().await? {
            if !record.is_expired_at(now) {
                continue;
            }

            self.repo.remove_key(&record.key).await?;
            removed += 1;

            let fingerprint = record.fingerprint();
            if let Some(lookup) = self.repo.find_lookup(&fingerprint).await? {
                // The fingerprint may already point at a newer key.
                if lookup.key == record.key {
                    self.claim_stale_lookup(&fingerprint, &record.key, now).await?;
                }
            }
        }

        for token in self.repo.list_replacements().await? {
            if token.is_expired_at(now) {
                self.repo.remove_replacement(&token.stale_key).await?;
            }
        }

        self.metrics.record_swept(removed);
        Ok(removed)
    }

    /// Claims the replacement of the lookup pointing at `stale_key` and deletes it.
    ///
    /// Returns false when another instance holds the claim. A claim whose
    /// lease ran out is released so the next attempt can take it.
    async fn claim_stale_lookup(&self, fingerprint: &Fingerprint, stale_key: &str, now: i64) -> Result<bool> {
        if !self
            .repo
            .try_claim_replacement(stale_key, now + REPLACEMENT_LEASE_MS)
            .await?
        {
            if let Some(token) = self.repo.find_replacement(stale_key).await? {
                if token.is_expired_at(now) {
                    tracing::warn!(key = %mask_sensitive(stale_key, 4), "Releasing abandoned lookup replacement");
                    self.repo.remove_replacement(stale_key).await?;
                }
            }
            return Ok(false);
        }

        // The claim only covers the lookup while it still names the stale key.
        match self.repo.find_lookup(fingerprint).await? {
            Some(lookup) if lookup.key == stale_key => self.repo.remove_lookup(fingerprint).await?,
            _ => {}
        }
        Ok(true)
    }
}

/// Periodic sweep of expired idempotency records.
pub struct IdempotencyCleanupJob {
    manager: Arc<IdempotencyManager>,
    interval_seconds: u64,
}

impl IdempotencyCleanupJob {
    pub fn new(manager: Arc<IdempotencyManager>, interval_seconds: u64) -> Self {
        Self {
            manager,
            interval_seconds: interval_seconds.max(1),
        }
    }

    pub async fn run_once(&self) -> Result<u64> {
        self.manager.cleanup_expired().await
    }

    /// Starts the sweep in a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(self.interval_seconds));

            loop {
                interval.tick().await;

                match self.manager.cleanup_expired().await {
                    Ok(count) => {
                        if count > 0 {
                            tracing::info!("Cleaned up {} expired idempotency keys", count);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to clean up expired idempotency keys: {}", e);
                    }
                }
            }
        })
    }
}
