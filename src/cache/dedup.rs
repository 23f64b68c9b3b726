use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::cache::{keys, CacheStore};
use crate::config::{
    DEDUP_SNAPSHOT_EVERY, DEDUP_SNAPSHOT_INTERVAL_SECS, LOCAL_DEDUP_MAX, LOCAL_DEDUP_TTL_SECS,
    SEEN_TTL_SECS,
};
use crate::error::Result;

/// Distributed seen-set and last-issue pointer with a bounded local fallback.
///
/// The redis tier is authoritative while reachable. Every mark also lands in
/// the local map, so a cache outage degrades to process-local dedup instead
/// of re-admitting recent issues. The local map is snapshotted to disk every
/// `DEDUP_SNAPSHOT_EVERY` insertions and on a fixed timer, and reloaded on
/// startup so a restart during an outage stays warm.
pub struct DedupStore {
    cache: Arc<CacheStore>,
    /// issue → insertion time (epoch seconds).
    local: DashMap<String, u64>,
    local_last: Mutex<Option<String>>,
    inserts: AtomicU64,
    snapshot_path: PathBuf,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl DedupStore {
    pub fn new(cache: Arc<CacheStore>, snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            cache,
            local: DashMap::new(),
            local_last: Mutex::new(None),
            inserts: AtomicU64::new(0),
            snapshot_path: snapshot_path.into(),
        }
    }

    /// Load the on-disk snapshot, keeping only entries still inside the TTL.
    pub async fn load_snapshot(&self) {
        let raw = match tokio::fs::read(&self.snapshot_path).await {
            Ok(r) => r,
            Err(_) => return,
        };
        let entries: HashMap<String, u64> = match serde_json::from_slice(&raw) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %self.snapshot_path.display(), "dedup snapshot unreadable: {e}");
                return;
            }
        };
        let now = now_secs();
        let mut kept = 0usize;
        for (issue, ts) in entries {
            if now.saturating_sub(ts) < LOCAL_DEDUP_TTL_SECS {
                self.local.insert(issue, ts);
                kept += 1;
            }
        }
        info!(kept, "dedup snapshot loaded");
    }

    fn local_contains(&self, issue: &str) -> bool {
        if let Some(entry) = self.local.get(issue) {
            if now_secs().saturating_sub(*entry.value()) < LOCAL_DEDUP_TTL_SECS {
                return true;
            }
        }
        false
    }

    fn local_insert(&self, issue: &str) {
        self.local.insert(issue.to_string(), now_secs());
        if self.local.len() > LOCAL_DEDUP_MAX {
            self.evict_oldest(self.local.len() - LOCAL_DEDUP_MAX);
        }
    }

    fn evict_oldest(&self, count: usize) {
        let mut entries: Vec<(String, u64)> = self
            .local
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        entries.sort_by_key(|(_, ts)| *ts);
        for (issue, _) in entries.into_iter().take(count) {
            self.local.remove(&issue);
        }
    }

    /// Whether this issue has already been committed. Redis answers when
    /// reachable; the local map covers outages and flapping.
    pub async fn is_seen(&self, issue: &str) -> bool {
        match self.cache.exists(&keys::seen_issue(issue)).await {
            Ok(true) => true,
            Ok(false) => self.local_contains(issue),
            Err(e) => {
                debug!("seen-set read fell back to local map: {e}");
                self.local_contains(issue)
            }
        }
    }

    /// Mark an issue committed (1-hour TTL) in both tiers.
    pub async fn mark_seen(&self, issue: &str) {
        if let Err(e) = self
            .cache
            .set_ex(&keys::seen_issue(issue), b"1", SEEN_TTL_SECS)
            .await
        {
            debug!("seen-set write fell back to local map: {e}");
        }
        self.local_insert(issue);

        let n = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if n % DEDUP_SNAPSHOT_EVERY == 0 {
            self.snapshot().await;
        }
    }

    pub async fn last_issue(&self) -> Option<String> {
        match self.cache.get_string(&keys::last_issue()).await {
            Ok(Some(v)) => Some(v),
            Ok(None) => self.local_last.lock().unwrap().clone(),
            Err(_) => self.local_last.lock().unwrap().clone(),
        }
    }

    pub async fn publish_last_issue(&self, issue: &str) {
        if let Err(e) = self
            .cache
            .set_forever(&keys::last_issue(), issue.as_bytes())
            .await
        {
            debug!("last-issue publish fell back to local: {e}");
        }
        *self.local_last.lock().unwrap() = Some(issue.to_string());
    }

    /// Write the local map to disk. Failures are logged, never surfaced.
    pub async fn snapshot(&self) {
        let entries: HashMap<String, u64> = self
            .local
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        let payload = match serde_json::to_vec(&entries) {
            Ok(p) => p,
            Err(e) => {
                warn!("dedup snapshot serialize failed: {e}");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&self.snapshot_path, payload).await {
            warn!(path = %self.snapshot_path.display(), "dedup snapshot write failed: {e}");
        }
    }

    /// Periodic snapshot loop. Runs until the process exits.
    pub fn spawn_snapshot_task(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = self;
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(DEDUP_SNAPSHOT_INTERVAL_SECS));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.snapshot().await;
            }
        })
    }

    #[cfg(test)]
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_store(dir: &tempfile::TempDir) -> DedupStore {
        DedupStore::new(
            Arc::new(CacheStore::unreachable()),
            dir.path().join("seen.json"),
        )
    }

    #[tokio::test]
    async fn falls_back_to_local_map_when_cache_is_down() {
        let dir = tempfile::tempdir().unwrap();
        let store = unreachable_store(&dir);

        assert!(!store.is_seen("2025001").await);
        store.mark_seen("2025001").await;
        assert!(store.is_seen("2025001").await);
        assert!(!store.is_seen("2025002").await);
    }

    #[tokio::test]
    async fn last_issue_survives_cache_outage() {
        let dir = tempfile::tempdir().unwrap();
        let store = unreachable_store(&dir);

        assert_eq!(store.last_issue().await, None);
        store.publish_last_issue("2025007").await;
        assert_eq!(store.last_issue().await, Some("2025007".to_string()));
    }

    #[tokio::test]
    async fn local_map_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let store = unreachable_store(&dir);

        for i in 0..(LOCAL_DEDUP_MAX + 50) {
            store.local_insert(&format!("{i:07}"));
        }
        assert!(store.local_len() <= LOCAL_DEDUP_MAX);
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.json");

        let store = DedupStore::new(Arc::new(CacheStore::unreachable()), &path);
        store.mark_seen("2025001").await;
        store.mark_seen("2025002").await;
        store.snapshot().await;

        let reloaded = DedupStore::new(Arc::new(CacheStore::unreachable()), &path);
        reloaded.load_snapshot().await;
        assert!(reloaded.is_seen("2025001").await);
        assert!(reloaded.is_seen("2025002").await);
        assert!(!reloaded.is_seen("2025003").await);
    }
}
