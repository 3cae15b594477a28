pub mod key_generator;
pub mod manager;
pub mod storage;

pub use key_generator::{canonical_json, generate_key, Fingerprint, IdempotencyKeyGenerator};
pub use manager::{
    IdempotencyCleanupJob, IdempotencyManager, IdempotencyMetrics, KeyOutcome, KeyRegistration,
    MetricsSnapshot,
};
pub use storage::{IdempotencyKeyRecord, IdempotencyRepository, LookupRecord, ReplacementToken};
