use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::config::DB_RETRY_ATTEMPTS;
use crate::error::{backoff_delay, classify_db_error, AppError, Result, RetryClass};
use crate::types::Draw;

/// Idempotent draw persistence. A unique-constraint violation means another
/// writer already committed the issue and is treated as a successful no-op;
/// transient storage errors are retried with jittered backoff.
pub struct DrawWriter {
    pool: SqlitePool,
}

impl DrawWriter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns true when this call inserted the row, false when the issue was
    /// already committed (duplicate no-op).
    pub async fn upsert_draw(&self, d: &Draw) -> Result<bool> {
        let mut attempt = 0u32;
        loop {
            match self.insert_once(d).await {
                Ok(()) => return Ok(true),
                Err(AppError::Database(e)) => match classify_db_error(&e) {
                    RetryClass::DuplicateNoop => {
                        debug!(issue = %d.issue, "draw already committed, treating as no-op");
                        return Ok(false);
                    }
                    RetryClass::Transient if attempt + 1 < DB_RETRY_ATTEMPTS => {
                        let delay = backoff_delay(attempt);
                        warn!(
                            issue = %d.issue,
                            attempt = attempt + 1,
                            "transient draw write failure, retrying in {delay:?}: {e}"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    _ => return Err(AppError::Database(e)),
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn insert_once(&self, d: &Draw) -> Result<()> {
        sqlx::query(
            "INSERT INTO draws (
                issue, open_time, open_nums, sum, source,
                is_big, is_small, is_odd, is_even, is_extreme_big, is_extreme_small,
                combination, is_triple, is_pair, is_straight, is_misc,
                is_small_edge, is_middle, is_big_edge, is_edge,
                is_dragon, is_tiger, is_tie,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&d.issue)
        .bind(d.open_time)
        .bind(&d.open_nums)
        .bind(d.sum as i64)
        .bind(&d.source)
        .bind(d.is_big)
        .bind(d.is_small)
        .bind(d.is_odd)
        .bind(d.is_even)
        .bind(d.is_extreme_big)
        .bind(d.is_extreme_small)
        .bind(d.combination.as_str())
        .bind(d.is_triple)
        .bind(d.is_pair)
        .bind(d.is_straight)
        .bind(d.is_misc)
        .bind(d.is_small_edge)
        .bind(d.is_middle)
        .bind(d.is_big_edge)
        .bind(d.is_edge)
        .bind(d.is_dragon)
        .bind(d.is_tiger)
        .bind(d.is_tie)
        .bind(d.created_at)
        .bind(d.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::enrich;
    use crate::ingest::validate::ValidDraw;

    fn sample_draw(issue: &str) -> Draw {
        let v = ValidDraw {
            issue: issue.to_string(),
            open_time: 1_765_350_600,
            open_nums: "3+5+8".to_string(),
            digits: [3, 5, 8],
            sum: 16,
            source: "S1".to_string(),
        };
        enrich(&v, 1)
    }

    #[tokio::test]
    async fn insert_then_duplicate_is_a_noop() {
        let pool = crate::db::test_pool().await;
        let writer = DrawWriter::new(pool.clone());

        let d = sample_draw("2025001");
        assert!(writer.upsert_draw(&d).await.unwrap());
        assert!(!writer.upsert_draw(&d).await.unwrap());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM draws")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn row_round_trips_through_the_typed_model() {
        let pool = crate::db::test_pool().await;
        let writer = DrawWriter::new(pool.clone());
        writer.upsert_draw(&sample_draw("2025002")).await.unwrap();

        let rows = crate::db::latest_draws(&pool, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        let draw = rows[0].clone().into_draw();
        assert_eq!(draw.issue, "2025002");
        assert_eq!(draw.sum, 16);
        assert!(draw.is_big && draw.is_even && draw.is_misc && draw.is_tiger);
    }
}
