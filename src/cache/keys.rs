//! Cache key grammar. Every key is namespaced by the store's configured
//! prefix; builders here return the un-prefixed form.

use crate::types::PredictionKind;

/// Per-issue write lock. Short TTL.
pub fn lock_issue(issue: &str) -> String {
    format!("lock:issue:{issue}")
}

/// Seen-set membership. TTL 1 hour.
pub fn seen_issue(issue: &str) -> String {
    format!("seen:issue:{issue}")
}

/// Last committed issue pointer. No TTL.
pub fn last_issue() -> String {
    "last:issue".to_string()
}

/// Latest-draws API payload for one `limit` variant.
pub fn latest_draws(limit: i64) -> String {
    format!("kj:limit:{limit}")
}

/// Pattern covering every latest-draws limit variant.
pub fn latest_draws_pattern() -> String {
    "kj:limit:*".to_string()
}

/// Omission snapshot payload.
pub fn omission() -> String {
    "yl".to_string()
}

/// Daily-stats snapshot payload.
pub fn daily_stats() -> String {
    "yk".to_string()
}

/// Prediction list payload for one kind and limit.
pub fn predictions(kind: PredictionKind, limit: i64) -> String {
    format!("predict:{kind}:limit:{limit}")
}

/// Pattern covering every cached payload of one prediction kind.
/// Does not match `predict:lock:*`.
pub fn predictions_pattern(kind: PredictionKind) -> String {
    format!("predict:{kind}:*")
}

/// Per-target-issue prediction lock. TTL 300 s.
pub fn predict_lock(issue: &str) -> String {
    format!("predict:lock:{issue}")
}

/// Hit-rate snapshot for one kind. TTL 5 min.
pub fn winrate(kind: PredictionKind) -> String {
    format!("winrate:{kind}")
}

/// Export artifact patterns (draw and stats Excel blobs). TTL 3 min.
pub fn excel_pattern() -> String {
    "excel:*".to_string()
}

/// Daily-stats per-issue idempotency marker. TTL = seconds until midnight.
pub fn daily_marker(date: &str, issue: &str) -> String {
    format!("today_stats:processed:{date}:{issue}")
}

/// Pattern covering one day's idempotency markers.
pub fn daily_marker_pattern(date: &str) -> String {
    format!("today_stats:processed:{date}:*")
}
