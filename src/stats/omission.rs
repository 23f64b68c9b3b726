//! Miss-streak engine. For each of the 49 categories the stored counter
//! equals the number of committed draws since the category last held.
//!
//! Application is NOT idempotent per draw; the coordinator's seen-set is the
//! guarantee that each committed draw reaches `apply` exactly once.

use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::info;

use crate::config::OMISSION_PAGE_SIZE;
use crate::enrich::{all_categories, held_categories};
use crate::error::Result;
use crate::types::Draw;

pub struct OmissionEngine {
    read_pool: SqlitePool,
    write_pool: SqlitePool,
    bootstrap_cap: i64,
}

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

impl OmissionEngine {
    pub fn new(read_pool: SqlitePool, write_pool: SqlitePool, bootstrap_cap: i64) -> Self {
        Self {
            read_pool,
            write_pool,
            bootstrap_cap,
        }
    }

    /// Fold one committed draw into the counters. On the first-ever call the
    /// table is bootstrapped from history, which already covers this draw.
    pub async fn apply(&self, draw: &Draw) -> Result<()> {
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM omission_counters")
            .fetch_one(&self.write_pool)
            .await?;
        if existing == 0 {
            return self.bootstrap().await;
        }

        let held = held_categories(draw);
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE omission_counters SET count = CASE WHEN category IN (");
        let mut parts = qb.separated(", ");
        for category in &held {
            parts.push_bind(*category);
        }
        qb.push(") THEN 0 ELSE count + 1 END, updated_at = ");
        qb.push_bind(now_ns());
        qb.build().execute(&self.write_pool).await?;
        Ok(())
    }

    /// Scan committed draws newest-first in pages until every category has
    /// been observed or the cap is reached; a category first seen at scan
    /// index `i` has missed exactly `i` newer draws. Categories unseen within
    /// the cap get a counter equal to the scanned count.
    async fn bootstrap(&self) -> Result<()> {
        let mut first_seen: std::collections::HashMap<&'static str, i64> =
            std::collections::HashMap::new();
        let all = all_categories();
        let mut scanned: i64 = 0;

        'scan: while scanned < self.bootstrap_cap {
            let page =
                crate::db::draws_page_desc(&self.read_pool, OMISSION_PAGE_SIZE, scanned).await?;
            if page.is_empty() {
                break;
            }
            for row in &page {
                let draw = row.clone().into_draw();
                for category in held_categories(&draw) {
                    first_seen.entry(category).or_insert(scanned);
                }
                scanned += 1;
                if first_seen.len() == all.len() || scanned >= self.bootstrap_cap {
                    break 'scan;
                }
            }
        }

        let now = now_ns();
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO omission_counters (category, count, updated_at) ");
        qb.push_values(all.iter(), |mut b, category| {
            let count = first_seen.get(category).copied().unwrap_or(scanned);
            b.push_bind(*category).push_bind(count).push_bind(now);
        });
        qb.push(" ON CONFLICT(category) DO UPDATE SET count = excluded.count, updated_at = excluded.updated_at");
        qb.build().execute(&self.write_pool).await?;

        info!(scanned, categories = all.len(), "omission counters bootstrapped");
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<Vec<crate::db::models::OmissionRow>> {
        let rows = sqlx::query_as::<_, crate::db::models::OmissionRow>(
            "SELECT category, count FROM omission_counters ORDER BY category",
        )
        .fetch_all(&self.read_pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::writer::DrawWriter;
    use crate::enrich::enrich;
    use crate::ingest::validate::ValidDraw;

    fn draw(issue: &str, digits: [u8; 3]) -> Draw {
        let v = ValidDraw {
            issue: issue.to_string(),
            open_time: 1_765_350_600,
            open_nums: format!("{}+{}+{}", digits[0], digits[1], digits[2]),
            digits,
            sum: digits.iter().sum(),
            source: "S1".to_string(),
        };
        enrich(&v, 1)
    }

    async fn counter(pool: &SqlitePool, category: &str) -> i64 {
        sqlx::query_scalar("SELECT count FROM omission_counters WHERE category = ?")
            .bind(category)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn bootstrap_covers_the_first_committed_draw() {
        let pool = crate::db::test_pool().await;
        let writer = DrawWriter::new(pool.clone());
        let engine = OmissionEngine::new(pool.clone(), pool.clone(), 10_000);

        // 3+5+8 = 16: holds big, even, big-even, middle, tiger, misc, "16"
        let d = draw("2025001", [3, 5, 8]);
        writer.upsert_draw(&d).await.unwrap();
        engine.apply(&d).await.unwrap();

        let rows = engine.snapshot().await.unwrap();
        assert_eq!(rows.len(), 49);
        for held in ["big", "even", "big-even", "middle", "tiger", "misc", "16"] {
            assert_eq!(counter(&pool, held).await, 0, "category {held}");
        }
        // one draw scanned, so every unseen category sits at 1
        for missed in ["small", "odd", "edge", "dragon", "00", "27", "triple"] {
            assert_eq!(counter(&pool, missed).await, 1, "category {missed}");
        }
    }

    #[tokio::test]
    async fn counters_track_miss_streaks_across_commits() {
        let pool = crate::db::test_pool().await;
        let writer = DrawWriter::new(pool.clone());
        let engine = OmissionEngine::new(pool.clone(), pool.clone(), 10_000);

        let first = draw("2025001", [3, 5, 8]); // sum 16, big even
        writer.upsert_draw(&first).await.unwrap();
        engine.apply(&first).await.unwrap();

        let second = draw("2025002", [1, 2, 3]); // sum 6, small even straight
        writer.upsert_draw(&second).await.unwrap();
        engine.apply(&second).await.unwrap();

        assert_eq!(counter(&pool, "small").await, 0);
        assert_eq!(counter(&pool, "straight").await, 0);
        assert_eq!(counter(&pool, "06").await, 0);
        assert_eq!(counter(&pool, "even").await, 0);
        // held by the first draw only: one miss since
        assert_eq!(counter(&pool, "big").await, 1);
        assert_eq!(counter(&pool, "16").await, 1);
        // held by neither: bootstrap index 1, then +1
        assert_eq!(counter(&pool, "odd").await, 2);
        assert_eq!(counter(&pool, "27").await, 2);
    }

    #[tokio::test]
    async fn counter_invariant_over_a_committed_sequence() {
        let pool = crate::db::test_pool().await;
        let writer = DrawWriter::new(pool.clone());
        let engine = OmissionEngine::new(pool.clone(), pool.clone(), 10_000);

        let sequence = [
            ("2025001", [3u8, 5, 8]),
            ("2025002", [1, 1, 4]),
            ("2025003", [9, 9, 9]),
            ("2025004", [0, 2, 4]),
            ("2025005", [7, 8, 9]),
        ];
        let mut draws = Vec::new();
        for (issue, digits) in sequence {
            let d = draw(issue, digits);
            writer.upsert_draw(&d).await.unwrap();
            engine.apply(&d).await.unwrap();
            draws.push(d);
        }

        // counter_c = draws since c last held, or draws-count when never held
        for category in crate::enrich::all_categories() {
            let expected = draws
                .iter()
                .rev()
                .position(|d| held_categories(d).contains(&category))
                .map(|p| p as i64)
                .unwrap_or(draws.len() as i64);
            assert_eq!(
                counter(&pool, category).await,
                expected,
                "category {category}"
            );
        }
    }
}
