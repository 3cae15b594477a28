pub mod cache;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod error;
pub mod idempotency;
pub mod observability;
pub mod rate_limit;
pub mod retry;
pub mod services;
pub mod store;
