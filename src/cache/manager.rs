//! Post-write cache invalidation. Subscribes to draw and prediction events
//! and drops exactly the key classes a commit makes stale. Prediction
//! payloads are NOT touched on a draw commit, since the new predictions have
//! not been written yet at that point; only on their own per-type events.

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::cache::{keys, CacheStore};
use crate::config::WINRATE_TTL_SECS;
use crate::predict::verifier::compute_hit_rate;
use crate::types::{Draw, PredictionEvent, PredictionKind};

pub struct CacheManager {
    cache: Arc<CacheStore>,
    read_pool: SqlitePool,
}

impl CacheManager {
    pub fn new(cache: Arc<CacheStore>, read_pool: SqlitePool) -> Self {
        Self { cache, read_pool }
    }

    pub fn spawn(
        self,
        draw_rx: broadcast::Receiver<Draw>,
        pred_rx: broadcast::Receiver<PredictionEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(draw_rx, pred_rx).await })
    }

    async fn run(
        self,
        mut draw_rx: broadcast::Receiver<Draw>,
        mut pred_rx: broadcast::Receiver<PredictionEvent>,
    ) {
        loop {
            tokio::select! {
                event = draw_rx.recv() => match event {
                    Ok(draw) => self.on_draw(&draw).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "cache manager lagged behind draw events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = pred_rx.recv() => match event {
                    Ok(ev) => self.on_prediction(ev).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "cache manager lagged behind prediction events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    /// Invalidate the draw-dependent key classes in parallel. Failures are
    /// isolated per class; a dead cache costs reads a round trip, nothing more.
    async fn on_draw(&self, draw: &Draw) {
        debug!(issue = %draw.issue, "invalidating draw-dependent cache keys");
        tokio::join!(
            async {
                if let Err(e) = self.cache.scan_delete(&keys::latest_draws_pattern()).await {
                    debug!("latest-draws invalidation skipped: {e}");
                }
            },
            async {
                if let Err(e) = self.cache.del(&keys::omission()).await {
                    debug!("omission snapshot invalidation skipped: {e}");
                }
            },
            async {
                if let Err(e) = self.cache.del(&keys::daily_stats()).await {
                    debug!("daily-stats snapshot invalidation skipped: {e}");
                }
            },
            async {
                if let Err(e) = self.cache.scan_delete(&keys::excel_pattern()).await {
                    debug!("export artifact invalidation skipped: {e}");
                }
            },
        );
    }

    async fn on_prediction(&self, event: PredictionEvent) {
        match event {
            PredictionEvent::Committed { issue, kind, duration_ms, .. } => {
                debug!(issue = %issue, kind = %kind, duration_ms, "invalidating prediction caches");
                if let Err(e) = self.cache.scan_delete(&keys::predictions_pattern(kind)).await {
                    debug!("prediction invalidation skipped: {e}");
                }
            }
            PredictionEvent::AllCommitted { issue } => {
                debug!(issue = %issue, "refreshing hit-rate snapshots");
                for kind in PredictionKind::ALL {
                    self.refresh_winrate(kind).await;
                }
            }
        }
    }

    async fn refresh_winrate(&self, kind: PredictionKind) {
        let rate = match compute_hit_rate(&self.read_pool, kind).await {
            Ok(r) => r,
            Err(e) => {
                warn!(kind = %kind, "hit-rate recompute failed: {e}");
                return;
            }
        };
        let payload = match serde_json::to_vec(&rate) {
            Ok(p) => p,
            Err(e) => {
                warn!(kind = %kind, "hit-rate serialize failed: {e}");
                return;
            }
        };
        if let Err(e) = self
            .cache
            .set_ex(&keys::winrate(kind), &payload, WINRATE_TTL_SECS)
            .await
        {
            debug!(kind = %kind, "hit-rate snapshot not cached: {e}");
        }
    }
}
