//! Connection-pool health check with adaptive cadence: tight loop with
//! exponential backoff while unhealthy, slow steady ticks once both pools
//! answer again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::{HEALTH_FAST_SECS, HEALTH_SLOW_SECS, RETRY_CEILING_MS};

#[derive(Default)]
pub struct PoolHealth {
    healthy: AtomicBool,
}

impl PoolHealth {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(true),
        })
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn spawn(
        self: Arc<Self>,
        read: SqlitePool,
        write: SqlitePool,
    ) -> tokio::task::JoinHandle<()> {
        let state = self;
        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(HEALTH_FAST_SECS);
            loop {
                let ok = ping(&read).await && ping(&write).await;
                let was = state.healthy.swap(ok, Ordering::Relaxed);

                if ok {
                    if !was {
                        info!("database pools recovered");
                    }
                    backoff = Duration::from_secs(HEALTH_FAST_SECS);
                    tokio::time::sleep(Duration::from_secs(HEALTH_SLOW_SECS)).await;
                } else {
                    if was {
                        warn!("database pools unhealthy, probing with backoff");
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_millis(RETRY_CEILING_MS));
                }
            }
        })
    }
}

async fn ping(pool: &SqlitePool) -> bool {
    sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool)
        .await
        .is_ok()
}
