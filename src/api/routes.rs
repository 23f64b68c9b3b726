use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::debug;

use crate::api::health::HealthState;
use crate::cache::{keys, CacheStore};
use crate::config::{
    API_HEALTH_TIMEOUT_SECS, API_TIMEOUT_SECS, LATEST_TTL_SECS, SNAPSHOT_TTL_SECS,
    WINRATE_TTL_SECS,
};
use crate::db::health::PoolHealth;
use crate::db::models::{DailyStatRow, DrawRow, OmissionRow, PredictionRow};
use crate::error::Result;
use crate::stats::DailyStatsEngine;
use crate::types::PredictionKind;

#[derive(Clone)]
pub struct ApiState {
    pub read_pool: SqlitePool,
    pub cache: Arc<CacheStore>,
    pub health: Arc<HealthState>,
    pub pool_health: Arc<PoolHealth>,
    pub daily: Arc<DailyStatsEngine>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/draws/latest", get(get_latest_draws))
        .route("/omission", get(get_omission))
        .route("/stats/daily", get(get_daily_stats))
        .route("/stats/daily/rebuild", post(post_rebuild_daily))
        .route("/predictions/:kind", get(get_predictions))
        .route("/winrate/:kind", get(get_winrate))
        .route("/health", get(get_health))
        .with_state(state)
}

/// Run a handler body under the per-request deadline: 500 with a generic body
/// on store errors, 408 when the deadline fires.
async fn with_deadline<F>(secs: u64, fut: F) -> std::result::Result<Json<Value>, StatusCode>
where
    F: Future<Output = Result<Value>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(Ok(v)) => Ok(Json(v)),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "API request failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(_) => Err(StatusCode::REQUEST_TIMEOUT),
    }
}

/// Cache-aside read: serve the cached JSON payload when present, otherwise
/// build it, cache it with the class TTL, and serve it. Cache failures fall
/// through to the database silently.
async fn cached_json<F>(
    cache: &CacheStore,
    key: &str,
    ttl_secs: u64,
    build: F,
) -> Result<Value>
where
    F: Future<Output = Result<Value>>,
{
    if let Ok(Some(bytes)) = cache.get(key).await {
        if let Ok(v) = serde_json::from_slice::<Value>(&bytes) {
            return Ok(v);
        }
    }

    let value = build.await?;
    if let Ok(bytes) = serde_json::to_vec(&value) {
        if let Err(e) = cache.set_ex(key, &bytes, ttl_secs).await {
            debug!(key, "payload not cached: {e}");
        }
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct DateQuery {
    pub date: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct DrawResponse {
    issue: String,
    open_time: i64,
    open_nums: String,
    sum: i64,
    source: String,
    combination: String,
    is_big: bool,
    is_odd: bool,
    is_triple: bool,
    is_pair: bool,
    is_straight: bool,
    is_edge: bool,
    is_dragon: bool,
    is_tiger: bool,
    is_tie: bool,
}

impl From<DrawRow> for DrawResponse {
    fn from(r: DrawRow) -> Self {
        Self {
            issue: r.issue,
            open_time: r.open_time,
            open_nums: r.open_nums,
            sum: r.sum,
            source: r.source,
            combination: r.combination,
            is_big: r.is_big,
            is_odd: r.is_odd,
            is_triple: r.is_triple,
            is_pair: r.is_pair,
            is_straight: r.is_straight,
            is_edge: r.is_edge,
            is_dragon: r.is_dragon,
            is_tiger: r.is_tiger,
            is_tie: r.is_tie,
        }
    }
}

#[derive(Serialize)]
struct CounterResponse {
    category: String,
    count: i64,
}

#[derive(Serialize)]
struct PredictionResponse {
    issue: String,
    kind: String,
    predicted_value: String,
    actual_numbers: Option<String>,
    actual_sum: Option<i64>,
    actual_value: Option<String>,
    hit: Option<bool>,
}

impl From<PredictionRow> for PredictionResponse {
    fn from(r: PredictionRow) -> Self {
        Self {
            issue: r.issue,
            kind: r.kind,
            predicted_value: r.predicted_value,
            actual_numbers: r.actual_numbers,
            actual_sum: r.actual_sum,
            actual_value: r.actual_value,
            hit: r.hit,
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_latest_draws(
    State(state): State<ApiState>,
    Query(params): Query<LimitQuery>,
) -> std::result::Result<Json<Value>, StatusCode> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    with_deadline(API_TIMEOUT_SECS, async move {
        cached_json(&state.cache, &keys::latest_draws(limit), LATEST_TTL_SECS, async {
            let rows = crate::db::latest_draws(&state.read_pool, limit).await?;
            let body: Vec<DrawResponse> = rows.into_iter().map(Into::into).collect();
            Ok(serde_json::to_value(body)?)
        })
        .await
    })
    .await
}

async fn get_omission(
    State(state): State<ApiState>,
) -> std::result::Result<Json<Value>, StatusCode> {
    with_deadline(API_TIMEOUT_SECS, async move {
        cached_json(&state.cache, &keys::omission(), SNAPSHOT_TTL_SECS, async {
            let rows = sqlx::query_as::<_, OmissionRow>(
                "SELECT category, count FROM omission_counters ORDER BY category",
            )
            .fetch_all(&state.read_pool)
            .await?;
            let body: Vec<CounterResponse> = rows
                .into_iter()
                .map(|r| CounterResponse { category: r.category, count: r.count })
                .collect();
            Ok(serde_json::to_value(body)?)
        })
        .await
    })
    .await
}

async fn get_daily_stats(
    State(state): State<ApiState>,
    Query(params): Query<DateQuery>,
) -> std::result::Result<Json<Value>, StatusCode> {
    let today = crate::stats::daily::date_key(chrono::Utc::now().timestamp());
    let date = params.date.unwrap_or_else(|| today.clone());
    let cacheable = date == today;

    with_deadline(API_TIMEOUT_SECS, async move {
        let build = async {
            let rows = sqlx::query_as::<_, DailyStatRow>(
                "SELECT date, category, count FROM daily_stats WHERE date = ? ORDER BY category",
            )
            .bind(&date)
            .fetch_all(&state.read_pool)
            .await?;
            let body: Vec<CounterResponse> = rows
                .into_iter()
                .map(|r| CounterResponse { category: r.category, count: r.count })
                .collect();
            Ok(serde_json::to_value(body)?)
        };

        if cacheable {
            cached_json(&state.cache, &keys::daily_stats(), SNAPSHOT_TTL_SECS, build).await
        } else {
            build.await
        }
    })
    .await
}

async fn post_rebuild_daily(
    State(state): State<ApiState>,
    Query(params): Query<DateQuery>,
) -> std::result::Result<Json<Value>, StatusCode> {
    let date = params
        .date
        .unwrap_or_else(|| crate::stats::daily::date_key(chrono::Utc::now().timestamp()));
    with_deadline(API_TIMEOUT_SECS, async move {
        let replayed = state.daily.rebuild(&date).await?;
        let _ = state.cache.del(&keys::daily_stats()).await;
        Ok(serde_json::json!({ "date": date, "replayed": replayed }))
    })
    .await
}

async fn get_predictions(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    Query(params): Query<LimitQuery>,
) -> std::result::Result<Json<Value>, StatusCode> {
    let kind = PredictionKind::from_str_label(&kind).ok_or(StatusCode::BAD_REQUEST)?;
    let limit = params.limit.unwrap_or(20).clamp(1, 200);

    with_deadline(API_TIMEOUT_SECS, async move {
        cached_json(&state.cache, &keys::predictions(kind, limit), LATEST_TTL_SECS, async {
            let rows = sqlx::query_as::<_, PredictionRow>(
                "SELECT * FROM predictions WHERE kind = ? \
                 ORDER BY CAST(issue AS INTEGER) DESC LIMIT ?",
            )
            .bind(kind.as_str())
            .bind(limit)
            .fetch_all(&state.read_pool)
            .await?;
            let body: Vec<PredictionResponse> = rows.into_iter().map(Into::into).collect();
            Ok(serde_json::to_value(body)?)
        })
        .await
    })
    .await
}

async fn get_winrate(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
) -> std::result::Result<Json<Value>, StatusCode> {
    let kind = PredictionKind::from_str_label(&kind).ok_or(StatusCode::BAD_REQUEST)?;
    with_deadline(API_TIMEOUT_SECS, async move {
        cached_json(&state.cache, &keys::winrate(kind), WINRATE_TTL_SECS, async {
            let rate = crate::predict::verifier::compute_hit_rate(&state.read_pool, kind).await?;
            Ok(serde_json::to_value(rate)?)
        })
        .await
    })
    .await
}

async fn get_health(
    State(state): State<ApiState>,
) -> std::result::Result<Json<Value>, StatusCode> {
    with_deadline(API_HEALTH_TIMEOUT_SECS, async move {
        Ok(serde_json::json!({
            "db_healthy": state.pool_health.is_healthy(),
            "cache_healthy": state.cache.is_healthy(),
            "draws_committed": state.health.draws_committed(),
            "last_commit_at_ns": state.health.last_commit_at_ns(),
        }))
    })
    .await
}
