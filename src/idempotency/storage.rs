use crate::error::Result;
use crate::idempotency::key_generator::Fingerprint;
use crate::store::{paths, KeyValueStore, KeyValueStoreExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stored idempotency key, at `idempotency/keys/{key}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyKeyRecord {
    pub key: String,
    pub endpoint: String,
    pub body_hash: String,
    pub created_at: i64,
    pub expires_at: i64,
}

impl IdempotencyKeyRecord {
    pub fn new(key: String, fingerprint: &Fingerprint, now: i64, ttl_ms: i64) -> Self {
        Self {
            key,
            endpoint: fingerprint.endpoint.clone(),
            body_hash: fingerprint.body_hash.clone(),
            created_at: now,
            expires_at: now + ttl_ms,
        }
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.expires_at
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            endpoint: self.endpoint.clone(),
            body_hash: self.body_hash.clone(),
        }
    }
}

/// Fingerprint-to-key index, at `idempotency/lookup/{fingerprint}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupRecord {
    pub key: String,
    pub endpoint: String,
    pub body_hash: String,
    pub expires_at: i64,
}

impl LookupRecord {
    pub fn for_record(record: &IdempotencyKeyRecord) -> Self {
        Self {
            key: record.key.clone(),
            endpoint: record.endpoint.clone(),
            body_hash: record.body_hash.clone(),
            expires_at: record.expires_at,
        }
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

/// Claim on replacing a stale lookup, at `idempotency/replace/{stale_key}`.
///
/// Only the holder may delete the lookup that still points at `stale_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplacementToken {
    pub stale_key: String,
    pub expires_at: i64,
}

impl ReplacementToken {
    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

/// Persistence of key and lookup records on top of a [`KeyValueStore`].
#[derive(Clone)]
pub struct IdempotencyRepository {
    store: Arc<dyn KeyValueStore>,
}

impl IdempotencyRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn find_lookup(&self, fingerprint: &Fingerprint) -> Result<Option<LookupRecord>> {
        self.store
            .get_json(&paths::idempotency_lookup(&fingerprint.lookup_id()))
            .await
    }

    /// Writes the lookup only if no lookup exists for the fingerprint.
    pub async fn try_insert_lookup(
        &self,
        fingerprint: &Fingerprint,
        lookup: &LookupRecord,
    ) -> Result<bool> {
        self.store
            .set_json_if_absent(&paths::idempotency_lookup(&fingerprint.lookup_id()), lookup)
            .await
    }

    pub async fn remove_lookup(&self, fingerprint: &Fingerprint) -> Result<()> {
        self.store
            .remove(&paths::idempotency_lookup(&fingerprint.lookup_id()))
            .await
    }

    pub async fn insert_key(&self, record: &IdempotencyKeyRecord) -> Result<()> {
        self.store
            .set_json(&paths::idempotency_key(&record.key), record)
            .await
    }

    pub async fn find_key(&self, key: &str) -> Result<Option<IdempotencyKeyRecord>> {
        self.store.get_json(&paths::idempotency_key(key)).await
    }

    pub async fn remove_key(&self, key: &str) -> Result<()> {
        self.store.remove(&paths::idempotency_key(key)).await
    }

    /// Claims the right to replace the lookup pointing at `stale_key`.
    pub async fn try_claim_replacement(&self, stale_key: &str, expires_at: i64) -> Result<bool> {
        let token = ReplacementToken {
            stale_key: stale_key.to_string(),
            expires_at,
        };
        self.store
            .set_json_if_absent(&paths::idempotency_replace(stale_key), &token)
            .await
    }

    pub async fn find_replacement(&self, stale_key: &str) -> Result<Option<ReplacementToken>> {
        self.store.get_json(&paths::idempotency_replace(stale_key)).await
    }

    pub async fn remove_replacement(&self, stale_key: &str) -> Result<()> {
        self.store.remove(&paths::idempotency_replace(stale_key)).await
    }

    pub async fn list_replacements(&self) -> Result<Vec<ReplacementToken>> {
        let entries = self.store.list(paths::IDEMPOTENCY_REPLACE).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(_, value)| serde_json::from_value(value).ok())
            .collect())
    }

    /// All key records. Entries that fail to decode are skipped.
    pub async fn list_keys(&self) -> Result<Vec<IdempotencyKeyRecord>> {
        let entries = self.store.list(paths::IDEMPOTENCY_KEYS).await?;
        let mut records = Vec::with_capacity(entries.len());
        for (path, value) in entries {
            match serde_json::from_value::<IdempotencyKeyRecord>(value) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(path = %path, "Ignoring malformed idempotency record: {}", e),
            }
        }
        Ok(records)
    }
}
