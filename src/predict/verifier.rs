//! Resolves prior predictions against the draw that just arrived and keeps
//! the per-type hit-rate snapshots current.

use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::HITRATE_WINDOW;
use crate::db::models::PredictionRow;
use crate::enrich::combination_of;
use crate::error::Result;
use crate::types::{Draw, HitRate, PredictionKind};

pub fn parity_label(sum: u8) -> &'static str {
    if sum % 2 == 1 {
        "单"
    } else {
        "双"
    }
}

pub fn magnitude_label(sum: u8) -> &'static str {
    if crate::enrich::magnitude_is_big(sum) {
        "大"
    } else {
        "小"
    }
}

pub fn combo_label(sum: u8) -> &'static str {
    combination_of(sum).zh_label()
}

/// Ground-truth value for one prediction type.
pub fn actual_value(kind: PredictionKind, sum: u8) -> &'static str {
    match kind {
        PredictionKind::Parity => parity_label(sum),
        PredictionKind::Magnitude => magnitude_label(sum),
        PredictionKind::Combo | PredictionKind::Kill => combo_label(sum),
    }
}

/// Deterministic hit computation.
/// Note the kill inversion: a kill prediction "hits" (user-facing success)
/// when the actual combo differs from the killed label.
pub fn compute_hit(kind: PredictionKind, predicted: &str, sum: u8) -> bool {
    let truth = actual_value(kind, sum);
    match kind {
        PredictionKind::Parity | PredictionKind::Magnitude => predicted.trim() == truth,
        PredictionKind::Combo => predicted.split(',').any(|label| label.trim() == truth),
        PredictionKind::Kill => predicted.trim() != truth,
    }
}

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

pub struct PredictionVerifier {
    read_pool: SqlitePool,
    write_pool: SqlitePool,
}

impl PredictionVerifier {
    pub fn new(read_pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self {
            read_pool,
            write_pool,
        }
    }

    /// Subscriber task over `draw-committed`.
    pub fn spawn(self, mut draw_rx: broadcast::Receiver<Draw>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match draw_rx.recv().await {
                    Ok(draw) => {
                        if let Err(e) = self.verify_draw(&draw).await {
                            warn!(issue = %draw.issue, "prediction verification failed: {e}");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "verifier lagged behind draw events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Fill in actuals and hit for every prediction targeting this issue.
    pub async fn verify_draw(&self, draw: &Draw) -> Result<()> {
        let mut outcomes: Vec<(PredictionKind, String, bool)> = Vec::new();

        for kind in PredictionKind::ALL {
            let row = sqlx::query_as::<_, PredictionRow>(
                "SELECT * FROM predictions WHERE issue = ? AND kind = ?",
            )
            .bind(&draw.issue)
            .bind(kind.as_str())
            .fetch_optional(&self.read_pool)
            .await?;

            let Some(prediction) = row else { continue };

            let hit = compute_hit(kind, &prediction.predicted_value, draw.sum);
            sqlx::query(
                "UPDATE predictions SET actual_numbers = ?, actual_sum = ?, actual_value = ?, \
                 hit = ?, updated_at = ? WHERE issue = ? AND kind = ?",
            )
            .bind(&draw.open_nums)
            .bind(draw.sum as i64)
            .bind(actual_value(kind, draw.sum))
            .bind(hit)
            .bind(now_ns())
            .bind(&draw.issue)
            .bind(kind.as_str())
            .execute(&self.write_pool)
            .await?;

            outcomes.push((kind, prediction.predicted_value, hit));
        }

        if !outcomes.is_empty() {
            let hits = outcomes.iter().filter(|(_, _, hit)| *hit).count();
            let detail = outcomes
                .iter()
                .map(|(kind, predicted, hit)| {
                    format!("{kind}={predicted}→{}", if *hit { "hit" } else { "miss" })
                })
                .collect::<Vec<_>>()
                .join(" ");
            info!(
                issue = %draw.issue,
                sum = draw.sum,
                hits,
                total = outcomes.len(),
                "[VERIFY] {detail} | {hits}/{}",
                outcomes.len(),
            );
        }

        Ok(())
    }
}

/// Hit-rate over the most recent resolved predictions of one type.
pub async fn compute_hit_rate(pool: &SqlitePool, kind: PredictionKind) -> Result<HitRate> {
    let resolved: Vec<bool> = sqlx::query_scalar(
        "SELECT hit FROM predictions WHERE kind = ? AND hit IS NOT NULL \
         ORDER BY CAST(issue AS INTEGER) DESC LIMIT ?",
    )
    .bind(kind.as_str())
    .bind(HITRATE_WINDOW)
    .fetch_all(pool)
    .await?;

    let total = resolved.len() as u32;
    let hits = resolved.iter().filter(|h| **h).count() as u32;
    Ok(HitRate {
        kind,
        total,
        hits,
        misses: total - hits,
        rate: if total == 0 { 0.0 } else { f64::from(hits) / f64::from(total) },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ground_truth_labels_from_sum() {
        assert_eq!(parity_label(19), "单");
        assert_eq!(parity_label(16), "双");
        assert_eq!(magnitude_label(19), "大");
        assert_eq!(magnitude_label(13), "小");
        assert_eq!(combo_label(19), "大单");
        assert_eq!(combo_label(6), "小双");
    }

    #[test]
    fn hit_rules_per_kind() {
        // sum 19 → 单, 大, 大单
        assert!(compute_hit(PredictionKind::Parity, "单", 19));
        assert!(!compute_hit(PredictionKind::Magnitude, "小", 19));
        assert!(compute_hit(PredictionKind::Combo, "大单,小双", 19));
        assert!(!compute_hit(PredictionKind::Combo, "小单,大双", 19));
        // kill hits when the truth is NOT the killed label
        assert!(!compute_hit(PredictionKind::Kill, "大单", 19));
        assert!(compute_hit(PredictionKind::Kill, "小双", 19));
    }

    async fn seed_prediction(pool: &SqlitePool, issue: &str, kind: PredictionKind, value: &str) {
        sqlx::query(
            "INSERT INTO predictions (issue, kind, predicted_value, created_at, updated_at) \
             VALUES (?, ?, ?, 1, 1)",
        )
        .bind(issue)
        .bind(kind.as_str())
        .bind(value)
        .execute(pool)
        .await
        .unwrap();
    }

    fn committed_draw(issue: &str, digits: [u8; 3]) -> Draw {
        let v = crate::ingest::validate::ValidDraw {
            issue: issue.to_string(),
            open_time: 1_765_351_800,
            open_nums: format!("{}+{}+{}", digits[0], digits[1], digits[2]),
            digits,
            sum: digits.iter().sum(),
            source: "S1".to_string(),
        };
        crate::enrich::enrich(&v, 1)
    }

    #[tokio::test]
    async fn round_trip_resolves_all_four_kinds() {
        let pool = crate::db::test_pool().await;
        seed_prediction(&pool, "2025011", PredictionKind::Parity, "单").await;
        seed_prediction(&pool, "2025011", PredictionKind::Magnitude, "小").await;
        seed_prediction(&pool, "2025011", PredictionKind::Combo, "大单,小双").await;
        seed_prediction(&pool, "2025011", PredictionKind::Kill, "大单").await;

        let verifier = PredictionVerifier::new(pool.clone(), pool.clone());
        // 4+7+8 = 19 → 单 大 大单
        verifier.verify_draw(&committed_draw("2025011", [4, 7, 8])).await.unwrap();

        let rows: Vec<PredictionRow> =
            sqlx::query_as("SELECT * FROM predictions WHERE issue = '2025011' ORDER BY kind")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(rows.len(), 4);
        for row in &rows {
            assert_eq!(row.actual_sum, Some(19));
            assert_eq!(row.actual_numbers.as_deref(), Some("4+7+8"));
            let expected = match row.kind.as_str() {
                "parity" => true,     // predicted 单, actual 单
                "magnitude" => false, // predicted 小, actual 大
                "combo" => true,      // 大单 is one of the two
                "kill" => false,      // killed 大单, actual 大单
                other => panic!("unexpected kind {other}"),
            };
            assert_eq!(row.hit, Some(expected), "kind {}", row.kind);
        }
    }

    #[tokio::test]
    async fn absent_predictions_are_skipped() {
        let pool = crate::db::test_pool().await;
        let verifier = PredictionVerifier::new(pool.clone(), pool.clone());
        verifier.verify_draw(&committed_draw("2025012", [1, 2, 3])).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM predictions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn hit_rate_aggregates_resolved_rows_only() {
        let pool = crate::db::test_pool().await;
        for (issue, hit) in [("2025001", Some(true)), ("2025002", Some(false)), ("2025003", None)] {
            sqlx::query(
                "INSERT INTO predictions (issue, kind, predicted_value, hit, created_at, updated_at) \
                 VALUES (?, 'parity', '单', ?, 1, 1)",
            )
            .bind(issue)
            .bind(hit)
            .execute(&pool)
            .await
            .unwrap();
        }

        let rate = compute_hit_rate(&pool, PredictionKind::Parity).await.unwrap();
        assert_eq!(rate.total, 2);
        assert_eq!(rate.hits, 1);
        assert_eq!(rate.misses, 1);
        assert!((rate.rate - 0.5).abs() < 1e-9);
    }
}
