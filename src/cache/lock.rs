use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::cache::CacheStore;

/// Distributed per-key mutex with TTL, degrading to a process-local map when
/// redis is unreachable. Multi-process deployments may transiently admit
/// duplicates during an outage; the idempotent database upsert absorbs them.
pub struct LockService {
    cache: Arc<CacheStore>,
    /// key → local expiry instant.
    local: Mutex<HashMap<String, Instant>>,
}

impl LockService {
    pub fn new(cache: Arc<CacheStore>) -> Self {
        Self {
            cache,
            local: Mutex::new(HashMap::new()),
        }
    }

    /// Non-blocking acquire. Returns false when another holder has the key.
    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> bool {
        match self
            .cache
            .set_nx_px(key, "1", ttl.as_millis() as u64)
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                debug!("lock service degraded to local mutex map: {e}");
                self.local_try_acquire(key, ttl).await
            }
        }
    }

    async fn local_try_acquire(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut map = self.local.lock().await;
        map.retain(|_, expiry| *expiry > now);
        if map.contains_key(key) {
            return false;
        }
        map.insert(key.to_string(), now + ttl);
        true
    }

    /// Release both tiers. Safe to call on a lock that was never held.
    pub async fn release(&self, key: &str) {
        if let Err(e) = self.cache.del(key).await {
            debug!("lock release skipped redis tier: {e}");
        }
        self.local.lock().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn degraded() -> LockService {
        LockService::new(Arc::new(CacheStore::unreachable()))
    }

    #[tokio::test]
    async fn local_lock_is_exclusive_until_released() {
        let locks = degraded();
        assert!(locks.try_acquire("lock:issue:2025001", Duration::from_secs(3)).await);
        assert!(!locks.try_acquire("lock:issue:2025001", Duration::from_secs(3)).await);
        assert!(locks.try_acquire("lock:issue:2025002", Duration::from_secs(3)).await);

        locks.release("lock:issue:2025001").await;
        assert!(locks.try_acquire("lock:issue:2025001", Duration::from_secs(3)).await);
    }

    #[tokio::test]
    async fn local_lock_expires_after_ttl() {
        let locks = degraded();
        assert!(locks.try_acquire("lock:issue:2025001", Duration::from_millis(20)).await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(locks.try_acquire("lock:issue:2025001", Duration::from_millis(20)).await);
    }
}
