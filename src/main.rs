mod api;
mod cache;
mod config;
mod db;
mod enrich;
mod error;
mod ingest;
mod poller;
mod predict;
mod state;
mod stats;
mod types;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::cache::dedup::DedupStore;
use crate::cache::lock::LockService;
use crate::cache::manager::CacheManager;
use crate::cache::CacheStore;
use crate::config::{Config, CHANNEL_CAPACITY};
use crate::db::health::PoolHealth;
use crate::db::writer::DrawWriter;
use crate::error::Result;
use crate::ingest::IngestCoordinator;
use crate::poller::SourcePoller;
use crate::predict::llm::LlmClient;
use crate::predict::verifier::PredictionVerifier;
use crate::predict::PredictionOrchestrator;
use crate::state::IssueTracker;
use crate::stats::{DailyStatsEngine, OmissionEngine};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Storage ---
    let pools = db::connect(&cfg).await?;

    // --- Cache tiers ---
    let cache = Arc::new(CacheStore::new(&cfg.redis_url, &cfg.cache_prefix)?);
    let dedup = Arc::new(DedupStore::new(
        Arc::clone(&cache),
        &cfg.dedup_snapshot_path,
    ));
    dedup.load_snapshot().await;
    Arc::clone(&dedup).spawn_snapshot_task();
    let locks = Arc::new(LockService::new(Arc::clone(&cache)));

    // --- In-process state ---
    let tracker = Arc::new(IssueTracker::new());
    tracker.initialize(&pools.read).await?;
    let health = HealthState::new();
    let pool_health = PoolHealth::new();
    Arc::clone(&pool_health).spawn(pools.read.clone(), pools.write.clone());

    // --- Channels ---
    let (raw_tx, raw_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (draw_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
    let (pred_tx, _) = broadcast::channel(CHANNEL_CAPACITY);

    // --- Subscribers (detached; the coordinator never waits on them) ---
    PredictionVerifier::new(pools.read.clone(), pools.write.clone()).spawn(draw_tx.subscribe());

    if cfg.predictions_enabled {
        let llm = Arc::new(LlmClient::new(&cfg)?);
        let orchestrator = PredictionOrchestrator::new(
            pools.read.clone(),
            pools.write.clone(),
            Arc::clone(&locks),
            llm,
            pred_tx.clone(),
            cfg.bias_threshold_pct,
        );
        orchestrator.spawn(draw_tx.subscribe());
    } else {
        warn!("PREDICTIONS_ENABLED=0: prediction streams are off");
    }

    CacheManager::new(Arc::clone(&cache), pools.read.clone())
        .spawn(draw_tx.subscribe(), pred_tx.subscribe());

    // --- Ingest pipeline ---
    let coordinator = IngestCoordinator::new(
        raw_rx,
        Arc::clone(&tracker),
        Arc::clone(&dedup),
        Arc::clone(&locks),
        DrawWriter::new(pools.write.clone()),
        OmissionEngine::new(
            pools.read.clone(),
            pools.write.clone(),
            cfg.omission_bootstrap_cap,
        ),
        DailyStatsEngine::new(
            pools.read.clone(),
            pools.write.clone(),
            Arc::clone(&cache),
        ),
        draw_tx.clone(),
        Arc::clone(&health),
    );
    tokio::spawn(coordinator.run());

    // --- Pollers ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    for source in cfg.sources.clone() {
        let poller = SourcePoller::new(source, raw_tx.clone(), shutdown_rx.clone())?;
        tokio::spawn(poller.run());
    }
    // The coordinator drains and stops once every poller handle is gone.
    drop(raw_tx);

    // --- HTTP API ---
    let api_state = ApiState {
        read_pool: pools.read.clone(),
        cache: Arc::clone(&cache),
        health,
        pool_health,
        daily: Arc::new(DailyStatsEngine::new(
            pools.read.clone(),
            pools.write.clone(),
            Arc::clone(&cache),
        )),
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx, Arc::clone(&dedup)))
        .await?;

    Ok(())
}

/// Teardown order: pollers stop first, the coordinator drains, the dedup
/// snapshot lands on disk, then the server and its sockets close.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>, dedup: Arc<DedupStore>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("shutdown signal listener failed: {e}");
        return;
    }
    info!("shutdown requested; stopping pollers");
    let _ = shutdown_tx.send(true);
    dedup.snapshot().await;
}
