use crate::error::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Shared, multi-writer key-value store used as the only coordination
/// primitive between stateless instances.
///
/// Paths are hierarchical strings separated by `/`. Implementations must
/// provide read-after-write consistency for a single caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored at `path`, or `None` if absent.
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Stores `value` at `path`, replacing any existing value.
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Stores `value` only if nothing exists at `path`.
    /// Returns `true` when the write happened.
    async fn set_if_absent(&self, path: &str, value: Value) -> Result<bool>;

    /// Removes the value at `path`. Removing a missing path is not an error.
    async fn remove(&self, path: &str) -> Result<()>;

    /// Lists all entries whose path starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>>;

    /// Verifies the store is reachable.
    async fn ping(&self) -> Result<()>;
}

/// Typed JSON helpers over any [`KeyValueStore`].
#[async_trait]
pub trait KeyValueStoreExt: KeyValueStore {
    async fn get_json<T>(&self, path: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(path).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T>(&self, path: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)?;
        self.set(path, value).await
    }

    async fn set_json_if_absent<T>(&self, path: &str, value: &T) -> Result<bool>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)?;
        self.set_if_absent(path, value).await
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}
