pub mod memory;
pub mod redis_store;
pub mod traits;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use traits::{KeyValueStore, KeyValueStoreExt};

#[cfg(test)]
pub use traits::MockKeyValueStore;

use crate::config::{StoreBackend, StoreSettings};
use crate::error::Result;
use std::sync::Arc;

/// Path helpers for the records each component owns.
pub mod paths {
    pub const IDEMPOTENCY_KEYS: &str = "idempotency/keys/";
    pub const IDEMPOTENCY_LOOKUP: &str = "idempotency/lookup/";
    pub const IDEMPOTENCY_REPLACE: &str = "idempotency/replace/";

    pub fn idempotency_key(key: &str) -> String {
        format!("{}{}", IDEMPOTENCY_KEYS, key)
    }

    pub fn idempotency_lookup(fingerprint: &str) -> String {
        format!("{}{}", IDEMPOTENCY_LOOKUP, fingerprint)
    }

    pub fn idempotency_replace(stale_key: &str) -> String {
        format!("{}{}", IDEMPOTENCY_REPLACE, stale_key)
    }

    pub fn rate_limit(user_id: &str, endpoint_key: &str) -> String {
        format!("ratelimit/{}/{}", user_id, endpoint_key)
    }

    pub fn cache(key: &str) -> String {
        format!("cache/{}", key)
    }
}

/// Builds the store selected in configuration.
pub fn build_store(settings: &StoreSettings) -> Result<Arc<dyn KeyValueStore>> {
    match settings.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Redis => {
            let client = redis::Client::open(settings.redis_url.as_str())?;
            Ok(Arc::new(RedisStore::new(client, settings.key_prefix.clone())))
        }
    }
}
