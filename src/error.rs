use std::time::Duration;

use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

use crate::config::{RETRY_BASE_MS, RETRY_CEILING_MS};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid draw: {0}")]
    InvalidDraw(String),

    #[error("Prediction reply did not match grammar: {0}")]
    PredictionParse(String),

    #[error("LLM call failed: {0}")]
    Llm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        tracing::error!(error = %self, "API request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    }
}

// ---------------------------------------------------------------------------
// Retry classification
// ---------------------------------------------------------------------------

/// How a failed storage operation should be handled by a retry wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Connect-timeout / deadlock / lost-connection class: retry with backoff.
    Transient,
    /// Constraint or logic errors: surface immediately.
    Terminal,
    /// Unique-constraint violation: the row is already there; success no-op.
    DuplicateNoop,
}

/// Classify a sqlx error for the write path. Unique violations map to
/// `DuplicateNoop` so concurrent writers of the same issue converge without
/// surfacing an error.
pub fn classify_db_error(e: &sqlx::Error) -> RetryClass {
    match e {
        sqlx::Error::Database(db) => {
            if db.is_unique_violation() {
                RetryClass::DuplicateNoop
            } else if db.is_foreign_key_violation() || db.is_check_violation() {
                RetryClass::Terminal
            } else {
                let msg = db.message().to_lowercase();
                if msg.contains("locked")
                    || msg.contains("busy")
                    || msg.contains("deadlock")
                    || msg.contains("lost connection")
                {
                    RetryClass::Transient
                } else {
                    RetryClass::Terminal
                }
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => RetryClass::Transient,
        _ => RetryClass::Terminal,
    }
}

/// HTTP statuses worth retrying on the LLM path.
pub fn is_retriable_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503 | 504)
}

/// Jittered exponential backoff: base doubling per attempt up to the ceiling,
/// plus up to 500ms of jitter.
pub fn backoff_delay(attempt: u32) -> Duration {
    use rand::Rng;
    let exp = RETRY_BASE_MS.saturating_mul(1u64 << attempt.min(8));
    let capped = exp.min(RETRY_CEILING_MS);
    let jitter = rand::thread_rng().gen_range(0..500);
    Duration::from_millis(capped + jitter)
}
