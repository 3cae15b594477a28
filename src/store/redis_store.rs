use crate::error::{AppError, Result};
use crate::observability::{get_metrics, LatencyTimer};
use crate::store::traits::KeyValueStore;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde_json::Value;

/// Redis-backed store. Values are stored as JSON strings under
/// `{key_prefix}:{path}`.
pub struct RedisStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisStore {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn make_key(&self, path: &str) -> String {
        format!("{}:{}", self.key_prefix, path)
    }

    fn strip_key<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(&self.key_prefix)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(key)
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::Redis)
    }

    fn decode(raw: &str) -> Result<Value> {
        serde_json::from_str(raw).map_err(AppError::Serialization)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let timer = LatencyTimer::new();
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<Option<String>> = conn.get(self.make_key(path)).await;
        get_metrics().record_kv_operation("get", timer.elapsed_ms(), result.is_ok());

        match result? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        let timer = LatencyTimer::new();
        let raw = serde_json::to_string(&value)?;
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<()> = conn.set(self.make_key(path), raw).await;
        get_metrics().record_kv_operation("set", timer.elapsed_ms(), result.is_ok());

        result.map_err(AppError::Redis)
    }

    async fn set_if_absent(&self, path: &str, value: Value) -> Result<bool> {
        let timer = LatencyTimer::new();
        let raw = serde_json::to_string(&value)?;
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<Option<String>> = conn
            .set_options(
                self.make_key(path),
                raw,
                redis::SetOptions::default().conditional_set(redis::ExistenceCheck::NX),
            )
            .await;
        get_metrics().record_kv_operation("set_nx", timer.elapsed_ms(), result.is_ok());

        Ok(result?.is_some())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let timer = LatencyTimer::new();
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<i64> = conn.del(self.make_key(path)).await;
        get_metrics().record_kv_operation("del", timer.elapsed_ms(), result.is_ok());

        result.map(|_| ()).map_err(AppError::Redis)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let timer = LatencyTimer::new();
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", self.make_key(prefix));

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            keys.extend(batch);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            // Keys may vanish between SCAN and GET.
            let raw: Option<String> = conn.get(&key).await?;
            if let Some(raw) = raw {
                match Self::decode(&raw) {
                    Ok(value) => entries.push((self.strip_key(&key).to_string(), value)),
                    Err(e) => tracing::warn!(key = %key, "Skipping undecodable entry: {}", e),
                }
            }
        }

        get_metrics().record_kv_operation("scan", timer.elapsed_ms(), true);
        Ok(entries)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(AppError::Redis)
    }
}
