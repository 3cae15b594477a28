use crate::error::Result;
use crate::store::traits::KeyValueStore;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Process-local store. Suitable for tests and single-instance deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.entries.write().await.insert(path.to_string(), value);
        Ok(())
    }

    async fn set_if_absent(&self, path: &str, value: Value) -> Result<bool> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(path) {
            return Ok(false);
        }
        entries.insert(path.to_string(), value);
        Ok(true)
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.entries.write().await.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
