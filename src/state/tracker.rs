use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{info, warn};

use crate::error::Result;

/// Process-local high-water mark over committed issues.
///
/// This is the only fast-path filter in front of the distributed layers: with
/// N pollers observing the same published issue within milliseconds, the
/// first caller advances past it and the rest drop here without touching
/// redis. Single writer (the coordinator), lock-free readers.
pub struct IssueTracker {
    latest: AtomicU64,
    ready: AtomicBool,
}

impl IssueTracker {
    pub fn new() -> Self {
        Self {
            latest: AtomicU64::new(0),
            ready: AtomicBool::new(false),
        }
    }

    /// Seed from the maximum committed issue. Fails open: on any storage
    /// error the mark stays at zero and `is_new` admits everything, so a cold
    /// database never filters real draws.
    pub async fn initialize(&self, pool: &sqlx::SqlitePool) -> Result<()> {
        let max: std::result::Result<Option<String>, sqlx::Error> =
            sqlx::query_scalar("SELECT MAX(issue) FROM draws").fetch_one(pool).await;

        match max {
            Ok(stored) => {
                let n = stored.and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
                self.latest.store(n, Ordering::Release);
                self.ready.store(true, Ordering::Release);
                info!(latest = n, "issue tracker initialized");
            }
            Err(e) => {
                self.latest.store(0, Ordering::Release);
                self.ready.store(false, Ordering::Release);
                warn!("issue tracker unready, admitting everything: {e}");
            }
        }
        Ok(())
    }

    /// Integer comparison against the high-water mark. Unready or unparsable
    /// issues are never filtered here.
    pub fn is_new(&self, issue: &str) -> bool {
        if !self.ready.load(Ordering::Acquire) {
            return true;
        }
        match issue.parse::<u64>() {
            Ok(n) => n > self.latest.load(Ordering::Acquire),
            Err(_) => true,
        }
    }

    /// Advance the mark. Non-increasing updates are ignored with a warning.
    pub fn update(&self, issue: &str) {
        let n = match issue.parse::<u64>() {
            Ok(n) => n,
            Err(_) => {
                warn!(issue, "tracker update ignored: issue is not numeric");
                return;
            }
        };
        let mut current = self.latest.load(Ordering::Acquire);
        loop {
            if n <= current {
                warn!(issue, latest = current, "tracker update ignored: not strictly newer");
                return;
            }
            match self.latest.compare_exchange_weak(
                current,
                n,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.ready.store(true, Ordering::Release);
                    return;
                }
                Err(observed) => current = observed,
            }
        }
    }

    pub fn latest(&self) -> u64 {
        self.latest.load(Ordering::Acquire)
    }
}

impl Default for IssueTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unready_tracker_never_filters() {
        let t = IssueTracker::new();
        assert!(t.is_new("2025001"));
        assert!(t.is_new("0000000"));
    }

    #[test]
    fn update_then_filter_older_issues() {
        let t = IssueTracker::new();
        t.update("2025005");
        assert!(!t.is_new("2025005"));
        assert!(!t.is_new("2025004"));
        assert!(t.is_new("2025006"));
    }

    #[test]
    fn non_increasing_update_is_ignored() {
        let t = IssueTracker::new();
        t.update("2025005");
        t.update("2025003");
        assert_eq!(t.latest(), 2_025_005);
    }
}
