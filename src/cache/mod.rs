pub mod cache_aside;

pub use cache_aside::{CacheAside, CacheEntry, CacheSnapshot, CacheStats};
