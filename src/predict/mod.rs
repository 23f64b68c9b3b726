pub mod llm;
pub mod parse;
pub mod prompt;
pub mod verifier;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::keys;
use crate::cache::lock::LockService;
use crate::config::{BIAS_WINDOW, HISTORY_LIMIT, PREDICT_LOCK_TTL_SECS};
use crate::error::Result;
use crate::types::{Draw, PredictionEvent, PredictionKind};

/// The issue the next draw will carry, zero-padded to 7 digits.
pub fn next_issue(issue: &str) -> Option<String> {
    issue.parse::<u64>().ok().map(|n| format!("{:07}", n + 1))
}

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

/// Drives four independent prediction streams per committed draw. Dispatch is
/// fire-and-forget: the draw-committed subscriber path never waits on an LLM
/// round trip, and a slow or failed task never blocks its siblings. The only
/// cross-task state is the per-issue completion counter.
pub struct PredictionOrchestrator {
    read_pool: SqlitePool,
    write_pool: SqlitePool,
    locks: Arc<LockService>,
    llm: Arc<llm::LlmClient>,
    pred_tx: broadcast::Sender<PredictionEvent>,
    /// target issue → completed task count; removed at 4.
    pending: DashMap<String, u8>,
    bias_threshold_pct: u8,
}

impl PredictionOrchestrator {
    pub fn new(
        read_pool: SqlitePool,
        write_pool: SqlitePool,
        locks: Arc<LockService>,
        llm: Arc<llm::LlmClient>,
        pred_tx: broadcast::Sender<PredictionEvent>,
        bias_threshold_pct: u8,
    ) -> Arc<Self> {
        Arc::new(Self {
            read_pool,
            write_pool,
            locks,
            llm,
            pred_tx,
            pending: DashMap::new(),
            bias_threshold_pct,
        })
    }

    /// Subscriber task over `draw-committed`.
    pub fn spawn(
        self: Arc<Self>,
        mut draw_rx: broadcast::Receiver<Draw>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match draw_rx.recv().await {
                    Ok(draw) => Self::handle_commit(&self, &draw).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "orchestrator lagged behind draw events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn handle_commit(this: &Arc<Self>, draw: &Draw) {
        let Some(target) = next_issue(&draw.issue) else {
            return;
        };

        if !this
            .locks
            .try_acquire(
                &keys::predict_lock(&target),
                Duration::from_secs(PREDICT_LOCK_TTL_SECS),
            )
            .await
        {
            debug!(target = %target, "prediction cycle already owned elsewhere");
            return;
        }

        this.pending.insert(target.clone(), 0);
        for kind in PredictionKind::ALL {
            let this = Arc::clone(this);
            let issue = target.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                match this.run_prediction(&issue, kind).await {
                    Ok(value) => {
                        info!(issue = %issue, kind = %kind, value = %value, "prediction committed");
                        let _ = this.pred_tx.send(PredictionEvent::Committed {
                            issue: issue.clone(),
                            kind,
                            value,
                            duration_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    Err(e) => {
                        warn!(issue = %issue, kind = %kind, "prediction task failed: {e}");
                    }
                }
                this.note_done(&issue);
            });
        }
    }

    async fn run_prediction(&self, issue: &str, kind: PredictionKind) -> Result<String> {
        let history = crate::db::latest_draws(&self.read_pool, HISTORY_LIMIT).await?;
        let recent: Vec<String> = sqlx::query_scalar(
            "SELECT predicted_value FROM predictions WHERE kind = ? \
             ORDER BY CAST(issue AS INTEGER) DESC LIMIT ?",
        )
        .bind(kind.as_str())
        .bind(BIAS_WINDOW)
        .fetch_all(&self.read_pool)
        .await?;

        let (system, user) =
            prompt::build_prompt(kind, issue, &history, &recent, self.bias_threshold_pct);
        let reply = self.llm.complete(&system, &user).await?;
        let value = parse::parse_reply(kind, &reply)?;

        let now = now_ns();
        sqlx::query(
            "INSERT INTO predictions (issue, kind, predicted_value, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(issue, kind) DO UPDATE SET \
             predicted_value = excluded.predicted_value, updated_at = excluded.updated_at",
        )
        .bind(issue)
        .bind(kind.as_str())
        .bind(&value)
        .bind(now)
        .bind(now)
        .execute(&self.write_pool)
        .await?;

        Ok(value)
    }

    /// Count a finished task (success or failure). The fourth completion
    /// fires `all-predictions-committed` and garbage-collects the counter.
    fn note_done(&self, issue: &str) {
        let done = {
            let mut entry = self.pending.entry(issue.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        if done >= 4 {
            self.pending.remove(issue);
            let _ = self.pred_tx.send(PredictionEvent::AllCommitted {
                issue: issue.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::config::Config;

    #[test]
    fn next_issue_is_zero_padded() {
        assert_eq!(next_issue("2025010").unwrap(), "2025011");
        assert_eq!(next_issue("0000009").unwrap(), "0000010");
        assert_eq!(next_issue("9999999").unwrap(), "10000000");
        assert!(next_issue("abc").is_none());
    }

    fn test_config() -> Config {
        Config {
            log_level: "info".to_string(),
            db_path: ":memory:".to_string(),
            redis_url: "redis://127.0.0.1:1".to_string(),
            cache_prefix: "test".to_string(),
            api_port: 0,
            db_read_pool_size: 1,
            db_write_pool_size: 1,
            sources: Vec::new(),
            dedup_snapshot_path: "seen.json".to_string(),
            omission_bootstrap_cap: 10_000,
            bias_threshold_pct: 70,
            predictions_enabled: true,
            llm_api_url: "http://127.0.0.1:1/v1/chat/completions".to_string(),
            llm_api_key: "test-key".to_string(),
            llm_model: "test-model".to_string(),
        }
    }

    #[tokio::test]
    async fn fourth_completion_fires_all_committed_and_gcs_the_counter() {
        let pool = crate::db::test_pool().await;
        let (pred_tx, mut pred_rx) = broadcast::channel(16);
        let orchestrator = PredictionOrchestrator::new(
            pool.clone(),
            pool,
            Arc::new(LockService::new(Arc::new(CacheStore::unreachable()))),
            Arc::new(llm::LlmClient::new(&test_config()).unwrap()),
            pred_tx,
            70,
        );

        for _ in 0..3 {
            orchestrator.note_done("2025011");
            assert!(pred_rx.try_recv().is_err());
        }
        orchestrator.note_done("2025011");

        match pred_rx.try_recv().unwrap() {
            PredictionEvent::AllCommitted { issue } => assert_eq!(issue, "2025011"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(orchestrator.pending.is_empty());
    }
}
