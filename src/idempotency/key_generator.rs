use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Result;

/// Mints a fresh random (v4) idempotency key.
pub fn generate_key() -> String {
    Uuid::new_v4().to_string()
}

/// Serializes a JSON value with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Stable identity of a logical command: `(endpoint, body_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub endpoint: String,
    pub body_hash: String,
}

impl Fingerprint {
    /// Hash of endpoint and body together, used as the lookup path segment.
    pub fn lookup_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.endpoint.as_bytes());
        hasher.update(b"|");
        hasher.update(self.body_hash.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Computes request fingerprints and mints keys.
#[derive(Debug, Clone, Default)]
pub struct IdempotencyKeyGenerator;

impl IdempotencyKeyGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self) -> String {
        generate_key()
    }

    /// SHA-256 of the canonical JSON body, hex-encoded.
    pub fn hash_body(&self, body: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical_json(body).as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn fingerprint(&self, endpoint: &str, body: &Value) -> Fingerprint {
        Fingerprint {
            endpoint: endpoint.to_string(),
            body_hash: self.hash_body(body),
        }
    }

    /// Fingerprints any serializable request body.
    pub fn fingerprint_of<T: Serialize>(&self, endpoint: &str, body: &T) -> Result<Fingerprint> {
        let value = serde_json::to_value(body)?;
        Ok(self.fingerprint(endpoint, &value))
    }
}
