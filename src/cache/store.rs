use std::sync::atomic::{AtomicBool, Ordering};

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use crate::config::SCAN_DELETE_BATCH;
use crate::error::Result;

/// Keyed cache over redis. Best-effort by design: every caller is expected to
/// degrade (local fallback, straight-to-database read) when an operation
/// fails, so errors are returned as-is and the store only tracks a health
/// flag for diagnostics.
pub struct CacheStore {
    client: redis::Client,
    prefix: String,
    healthy: AtomicBool,
}

impl CacheStore {
    pub fn new(url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            prefix: prefix.to_string(),
            healthy: AtomicBool::new(true),
        })
    }

    /// A store whose every operation fails. Exercises the local fallbacks.
    #[cfg(test)]
    pub fn unreachable() -> Self {
        Self::new("redis://127.0.0.1:1", "test").unwrap()
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    async fn conn(&self) -> Result<MultiplexedConnection> {
        match self.client.get_multiplexed_async_connection().await {
            Ok(c) => {
                self.healthy.store(true, Ordering::Relaxed);
                Ok(c)
            }
            Err(e) => {
                self.healthy.store(false, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    fn observe<T>(&self, r: redis::RedisResult<T>) -> Result<T> {
        match r {
            Ok(v) => {
                self.healthy.store(true, Ordering::Relaxed);
                Ok(v)
            }
            Err(e) => {
                self.healthy.store(false, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let r = conn.get(self.namespaced(key)).await;
        self.observe(r)
    }

    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        let r = conn.get(self.namespaced(key)).await;
        self.observe(r)
    }

    pub async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn().await?;
        let r: redis::RedisResult<()> = conn.set_ex(self.namespaced(key), value, ttl_secs).await;
        self.observe(r)
    }

    /// Set with no TTL (the last-issue pointer).
    pub async fn set_forever(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn().await?;
        let r: redis::RedisResult<()> = conn.set(self.namespaced(key), value).await;
        self.observe(r)
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let r = conn.exists(self.namespaced(key)).await;
        self.observe(r)
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let r: redis::RedisResult<()> = conn.del(self.namespaced(key)).await;
        self.observe(r)
    }

    /// SET NX PX. Returns true when the key was absent and is now held.
    pub async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        let mut conn = self.conn().await?;
        let r: redis::RedisResult<Option<String>> = redis::cmd("SET")
            .arg(self.namespaced(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await;
        Ok(self.observe(r)?.is_some())
    }

    /// Delete every key matching `pattern` using cursor SCAN iteration and
    /// DEL batches of at most `SCAN_DELETE_BATCH` keys. Returns the number of
    /// keys removed.
    pub async fn scan_delete(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        let full_pattern = self.namespaced(pattern);
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        loop {
            let r: redis::RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&full_pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await;
            let (next, keys) = self.observe(r)?;

            for chunk in keys.chunks(SCAN_DELETE_BATCH) {
                if chunk.is_empty() {
                    continue;
                }
                let r: redis::RedisResult<u64> =
                    redis::cmd("DEL").arg(chunk).query_async(&mut conn).await;
                deleted += self.observe(r)?;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        if deleted > 0 {
            debug!(pattern = %full_pattern, deleted, "cache pattern invalidated");
        }
        Ok(deleted)
    }
}
