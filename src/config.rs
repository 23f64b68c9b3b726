use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::poller::parsers::ParserId;

/// Per-source fetch deadline (seconds). A poll slower than this is dropped;
/// the next tick is the retry.
pub const FETCH_TIMEOUT_SECS: u64 = 8;

/// LLM completion call deadline (seconds).
pub const LLM_TIMEOUT_SECS: u64 = 20;

/// Per-issue write lock TTL (milliseconds). Long enough to cover one
/// validate+enrich+insert round trip, short enough to self-heal on crash.
pub const LOCK_TTL_MS: u64 = 3_000;

/// Per-issue prediction lock TTL (seconds). Prevents a second process from
/// re-running the four prediction tasks for the same target issue.
pub const PREDICT_LOCK_TTL_SECS: u64 = 300;

/// Seen-set entry TTL (seconds).
pub const SEEN_TTL_SECS: u64 = 3_600;

/// Hit-rate snapshot TTL (seconds).
pub const WINRATE_TTL_SECS: u64 = 300;

/// Latest-draws API payload TTL (seconds).
pub const LATEST_TTL_SECS: u64 = 60;

/// Omission / daily-stats API payload TTL (seconds).
pub const SNAPSHOT_TTL_SECS: u64 = 60;

/// Capacity of the raw-draw ingest channel and the event broadcast channels.
pub const CHANNEL_CAPACITY: usize = 1_024;

/// Retry backoff base and ceiling (milliseconds).
pub const RETRY_BASE_MS: u64 = 2_000;
pub const RETRY_CEILING_MS: u64 = 10_000;

/// Attempts for the retry-wrapped draw write and the LLM call.
pub const DB_RETRY_ATTEMPTS: u32 = 5;
pub const LLM_RETRY_ATTEMPTS: u32 = 4;

/// Omission bootstrap scans newest-first in pages of this size.
pub const OMISSION_PAGE_SIZE: i64 = 500;

/// Prediction prompt inputs.
pub const HISTORY_LIMIT: i64 = 50;
pub const BIAS_WINDOW: i64 = 10;

/// Hit-rate snapshots aggregate over this many most-recent resolved predictions.
pub const HITRATE_WINDOW: i64 = 100;

/// Local dedup fallback bounds.
pub const LOCAL_DEDUP_MAX: usize = 5_000;
pub const LOCAL_DEDUP_TTL_SECS: u64 = 3_600;

/// Local dedup snapshot cadence: every N insertions and every interval.
pub const DEDUP_SNAPSHOT_EVERY: u64 = 100;
pub const DEDUP_SNAPSHOT_INTERVAL_SECS: u64 = 300;

/// Pool health check cadence: fast while unhealthy, slow while healthy.
pub const HEALTH_FAST_SECS: u64 = 1;
pub const HEALTH_SLOW_SECS: u64 = 30;

/// Delete-by-pattern batches at most this many keys per DEL.
pub const SCAN_DELETE_BATCH: usize = 1_000;

/// Per-request API handler deadlines (seconds).
pub const API_TIMEOUT_SECS: u64 = 30;
pub const API_HEALTH_TIMEOUT_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Source table
// ---------------------------------------------------------------------------

/// One upstream draw feed. All sources publish the same canonical stream;
/// the coordinator keeps whichever copy arrives first.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    /// Poll cadence in milliseconds (500–2000 across the default table).
    pub interval_ms: u64,
    pub parser: ParserId,
    #[serde(default)]
    pub skip_tls: bool,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            name: "kuai-a".to_string(),
            url: "https://api.kuaikai28.com/api/v1/latest".to_string(),
            interval_ms: 1_000,
            parser: ParserId::Tabular,
            skip_tls: false,
            headers: Vec::new(),
        },
        SourceConfig {
            name: "kuai-b".to_string(),
            url: "https://data.28cai.net/newest.json".to_string(),
            interval_ms: 1_500,
            parser: ParserId::Tabular,
            skip_tls: true,
            headers: vec![("Referer".to_string(), "https://data.28cai.net/".to_string())],
        },
        SourceConfig {
            name: "keno-west".to_string(),
            url: "https://www.wclc.com/winning-numbers/keno-api/latest".to_string(),
            interval_ms: 2_000,
            parser: ParserId::KenoReduce,
            skip_tls: false,
            headers: Vec::new(),
        },
    ]
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub redis_url: String,
    /// Namespace prefix for every cache key.
    pub cache_prefix: String,
    pub api_port: u16,
    /// Read pool is sized for far more concurrency than the write pool.
    pub db_read_pool_size: u32,
    pub db_write_pool_size: u32,
    pub sources: Vec<SourceConfig>,
    /// Local dedup fallback snapshot file.
    pub dedup_snapshot_path: String,
    /// Omission bootstrap scan cap (draws).
    pub omission_bootstrap_cap: i64,
    /// Percent of the last-10 histogram one label must occupy to trigger the
    /// bias-balancing hint.
    pub bias_threshold_pct: u8,
    pub predictions_enabled: bool,
    pub llm_api_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let predictions_enabled = std::env::var("PREDICTIONS_ENABLED")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);
        let llm_api_key = std::env::var("LLM_API_KEY").unwrap_or_default();
        if predictions_enabled && llm_api_key.is_empty() {
            return Err(AppError::Config(
                "LLM_API_KEY is required while predictions are enabled; set it or set PREDICTIONS_ENABLED=0".to_string(),
            ));
        }

        let sources = match std::env::var("SOURCES_JSON") {
            Ok(raw) => serde_json::from_str::<Vec<SourceConfig>>(&raw)
                .map_err(|e| AppError::Config(format!("SOURCES_JSON is not valid: {e}")))?,
            Err(_) => default_sources(),
        };
        if sources.is_empty() {
            return Err(AppError::Config("at least one source must be configured".to_string()));
        }

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "drawfeed.db".to_string()),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            cache_prefix: std::env::var("CACHE_PREFIX").unwrap_or_else(|_| "drawfeed".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            db_read_pool_size: std::env::var("DB_READ_POOL_SIZE")
                .unwrap_or_else(|_| "16".to_string())
                .parse::<u32>()
                .unwrap_or(16),
            db_write_pool_size: std::env::var("DB_WRITE_POOL_SIZE")
                .unwrap_or_else(|_| "2".to_string())
                .parse::<u32>()
                .unwrap_or(2),
            sources,
            dedup_snapshot_path: std::env::var("DEDUP_SNAPSHOT_PATH")
                .unwrap_or_else(|_| "dedup-seen.json".to_string()),
            omission_bootstrap_cap: std::env::var("OMISSION_BOOTSTRAP_CAP")
                .unwrap_or_else(|_| "10000".to_string())
                .parse::<i64>()
                .unwrap_or(10_000),
            bias_threshold_pct: std::env::var("PREDICT_BIAS_THRESHOLD_PCT")
                .unwrap_or_else(|_| "70".to_string())
                .parse::<u8>()
                .unwrap_or(70),
            predictions_enabled,
            llm_api_url: std::env::var("LLM_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
            llm_api_key,
            llm_model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        })
    }
}
