pub mod validate;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::api::health::HealthState;
use crate::cache::dedup::DedupStore;
use crate::cache::lock::LockService;
use crate::cache::keys;
use crate::config::LOCK_TTL_MS;
use crate::db::writer::DrawWriter;
use crate::enrich::enrich;
use crate::error::Result;
use crate::state::IssueTracker;
use crate::stats::{DailyStatsEngine, OmissionEngine};
use crate::types::{Draw, RawDraw};

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

/// Funnels every poller's output through the three dedup layers and drives
/// the write path. Effectively single-threaded per issue: the tracker gate
/// absorbs the in-process herd, the seen-set absorbs warm restarts, and the
/// distributed lock serializes cross-process writers.
pub struct IngestCoordinator {
    raw_rx: mpsc::Receiver<RawDraw>,
    tracker: Arc<IssueTracker>,
    dedup: Arc<DedupStore>,
    locks: Arc<LockService>,
    writer: DrawWriter,
    omission: OmissionEngine,
    daily: DailyStatsEngine,
    draw_tx: broadcast::Sender<Draw>,
    health: Arc<HealthState>,
}

impl IngestCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        raw_rx: mpsc::Receiver<RawDraw>,
        tracker: Arc<IssueTracker>,
        dedup: Arc<DedupStore>,
        locks: Arc<LockService>,
        writer: DrawWriter,
        omission: OmissionEngine,
        daily: DailyStatsEngine,
        draw_tx: broadcast::Sender<Draw>,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            raw_rx,
            tracker,
            dedup,
            locks,
            writer,
            omission,
            daily,
            draw_tx,
            health,
        }
    }

    pub async fn run(mut self) {
        info!("ingest coordinator started");
        while let Some(raw) = self.raw_rx.recv().await {
            self.handle_raw(raw).await;
        }
        info!("ingest coordinator stopped");
    }

    pub async fn handle_raw(&mut self, raw: RawDraw) {
        // Fast path: not strictly newer than the high-water mark.
        if !self.tracker.is_new(&raw.issue) {
            debug!(issue = %raw.issue, source = %raw.source, "dropped at tracker gate");
            return;
        }
        if self.dedup.is_seen(&raw.issue).await {
            debug!(issue = %raw.issue, source = %raw.source, "dropped at seen-set");
            return;
        }

        let lock_key = keys::lock_issue(&raw.issue);
        if !self
            .locks
            .try_acquire(&lock_key, Duration::from_millis(LOCK_TTL_MS))
            .await
        {
            debug!(issue = %raw.issue, source = %raw.source, "dropped: issue lock contended");
            return;
        }

        let outcome = self.process_locked(&raw).await;
        self.locks.release(&lock_key).await;

        match outcome {
            Ok(Some(draw)) => {
                self.health.record_commit(now_ns() as u64);
                info!(
                    issue = %draw.issue,
                    nums = %draw.open_nums,
                    sum = draw.sum,
                    source = %draw.source,
                    "draw committed"
                );
                // Fan out with the per-issue lock already released.
                let _ = self.draw_tx.send(draw);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(issue = %raw.issue, source = %raw.source, "draw dropped: {e}");
            }
        }
    }

    /// The locked section of the pipeline. Returns the committed draw, or
    /// None when this copy turned out to be a duplicate.
    async fn process_locked(&self, raw: &RawDraw) -> Result<Option<Draw>> {
        if self.dedup.is_seen(&raw.issue).await {
            debug!(issue = %raw.issue, "dropped at seen-set re-check under lock");
            return Ok(None);
        }

        let valid = validate::validate(raw, Utc::now())?;

        // Concurrent multi-source back-fill is allowed: warn but continue.
        if let Some(last) = self.dedup.last_issue().await {
            if let (Ok(n), Ok(l)) = (valid.issue.parse::<u64>(), last.parse::<u64>()) {
                if n <= l {
                    warn!(issue = %valid.issue, last = %last, "issue does not advance the last-issue pointer");
                }
            }
        }

        let draw = enrich(&valid, now_ns());

        let inserted = self.writer.upsert_draw(&draw).await?;
        if !inserted {
            // Another process committed it first; advance the local gates
            // without re-applying the engines or re-emitting the event.
            self.dedup.mark_seen(&draw.issue).await;
            self.tracker.update(&draw.issue);
            return Ok(None);
        }

        // Engine failures never roll back the committed draw.
        if let Err(e) = self.omission.apply(&draw).await {
            warn!(issue = %draw.issue, "omission engine failed: {e}");
        }
        if let Err(e) = self.daily.apply(&draw).await {
            warn!(issue = %draw.issue, "daily stats engine failed: {e}");
        }

        self.dedup.mark_seen(&draw.issue).await;
        self.dedup.publish_last_issue(&draw.issue).await;
        self.tracker.update(&draw.issue);

        Ok(Some(draw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;

    struct Fixture {
        coordinator: IngestCoordinator,
        pool: sqlx::SqlitePool,
        draw_rx: broadcast::Receiver<Draw>,
        _raw_tx: mpsc::Sender<RawDraw>,
    }

    async fn fixture() -> Fixture {
        let pool = crate::db::test_pool().await;
        let cache = Arc::new(CacheStore::unreachable());
        let dir = std::env::temp_dir().join(format!("drawfeed-test-{}", now_ns()));
        let dedup = Arc::new(DedupStore::new(Arc::clone(&cache), dir));
        let locks = Arc::new(LockService::new(Arc::clone(&cache)));
        let tracker = Arc::new(IssueTracker::new());
        let (raw_tx, raw_rx) = mpsc::channel(64);
        let (draw_tx, draw_rx) = broadcast::channel(64);

        let coordinator = IngestCoordinator::new(
            raw_rx,
            tracker,
            dedup,
            locks,
            DrawWriter::new(pool.clone()),
            OmissionEngine::new(pool.clone(), pool.clone(), 10_000),
            DailyStatsEngine::new(pool.clone(), pool.clone(), cache),
            draw_tx,
            HealthState::new(),
        );
        Fixture {
            coordinator,
            pool,
            draw_rx,
            _raw_tx: raw_tx,
        }
    }

    fn raw(issue: &str) -> RawDraw {
        RawDraw {
            issue: issue.to_string(),
            open_time: "2025-12-10 15:30:00".to_string(),
            open_nums: "3+5+8".to_string(),
            sum: 16,
            source: "S1".to_string(),
        }
    }

    async fn draw_count(pool: &sqlx::SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM draws")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn commits_a_fresh_draw_and_emits_the_event() {
        let mut f = fixture().await;
        f.coordinator.handle_raw(raw("2025001")).await;

        assert_eq!(draw_count(&f.pool).await, 1);
        let committed = f.draw_rx.try_recv().unwrap();
        assert_eq!(committed.issue, "2025001");
        assert!(committed.is_big && committed.is_even);

        // engines ran exactly once
        let omission_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM omission_counters")
            .fetch_one(&f.pool)
            .await
            .unwrap();
        assert_eq!(omission_rows, 49);
    }

    #[tokio::test]
    async fn same_issue_from_five_pollers_commits_once() {
        let mut f = fixture().await;
        for source in ["S1", "S2", "S3", "S4", "S5"] {
            let mut r = raw("2025002");
            r.source = source.to_string();
            f.coordinator.handle_raw(r).await;
        }

        assert_eq!(draw_count(&f.pool).await, 1);
        assert!(f.draw_rx.try_recv().is_ok());
        assert!(f.draw_rx.try_recv().is_err(), "exactly one commit event");

        // daily stats applied exactly once
        let big_even: i64 =
            sqlx::query_scalar("SELECT count FROM daily_stats WHERE category = 'big-even'")
                .fetch_one(&f.pool)
                .await
                .unwrap();
        assert_eq!(big_even, 1);
    }

    #[tokio::test]
    async fn sum_mismatch_is_rejected_without_side_effects() {
        let mut f = fixture().await;
        let mut bad = raw("2025003");
        bad.sum = 15;
        f.coordinator.handle_raw(bad).await;

        assert_eq!(draw_count(&f.pool).await, 0);
        assert!(f.draw_rx.try_recv().is_err());
        let counters: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM omission_counters")
            .fetch_one(&f.pool)
            .await
            .unwrap();
        assert_eq!(counters, 0);
    }

    #[tokio::test]
    async fn warm_seen_set_suppresses_recommit_after_restart() {
        let mut f = fixture().await;
        f.coordinator.handle_raw(raw("2025004")).await;
        assert_eq!(draw_count(&f.pool).await, 1);

        // Simulate a restart: fresh tracker, same dedup store and database.
        f.coordinator.tracker = Arc::new(IssueTracker::new());
        f.coordinator.handle_raw(raw("2025004")).await;

        assert_eq!(draw_count(&f.pool).await, 1);
        let big: i64 = sqlx::query_scalar("SELECT count FROM omission_counters WHERE category = 'big'")
            .fetch_one(&f.pool)
            .await
            .unwrap();
        assert_eq!(big, 0, "engine must not have been re-applied");
    }

    #[tokio::test]
    async fn older_issue_is_dropped_at_the_tracker_gate() {
        let mut f = fixture().await;
        f.coordinator.handle_raw(raw("2025005")).await;
        let _ = f.draw_rx.try_recv();

        let mut older = raw("2025004");
        older.open_nums = "1+2+3".to_string();
        older.sum = 6;
        f.coordinator.handle_raw(older).await;

        assert_eq!(draw_count(&f.pool).await, 1);
        assert!(f.draw_rx.try_recv().is_err());
    }
}
