//! Per-day per-category hit counts, keyed by the draw's wall-clock day at
//! +08:00. A cache-side idempotency marker guards against double application
//! while the distributed tiers are flapping; the manual rebuild is the
//! recovery path when that marker is lost.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, TimeZone, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::cache::{keys, CacheStore};
use crate::enrich::held_categories;
use crate::error::Result;
use crate::types::Draw;

pub fn tz8() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("+08:00 is a valid offset")
}

/// The +08:00 calendar date of an epoch-seconds instant.
pub fn date_key(epoch_secs: i64) -> String {
    let dt: DateTime<FixedOffset> = Utc
        .timestamp_opt(epoch_secs, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch"))
        .with_timezone(&tz8());
    dt.format("%Y-%m-%d").to_string()
}

/// Epoch-second bounds `[start, end)` of a +08:00 calendar date ("YYYY-MM-DD").
pub fn day_bounds(date: &str) -> Option<(i64, i64)> {
    let day = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let start = tz8()
        .from_local_datetime(&day.and_hms_opt(0, 0, 0)?)
        .single()?;
    let end = start + ChronoDuration::days(1);
    Some((start.timestamp(), end.timestamp()))
}

/// Seconds remaining until the next +08:00 midnight, floored at one.
fn secs_until_midnight(now: DateTime<Utc>) -> u64 {
    let local = now.with_timezone(&tz8());
    let next = (local.date_naive() + ChronoDuration::days(1))
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| tz8().from_local_datetime(&naive).single());
    match next {
        Some(midnight) => (midnight.timestamp() - now.timestamp()).max(1) as u64,
        None => 1,
    }
}

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

pub struct DailyStatsEngine {
    read_pool: SqlitePool,
    write_pool: SqlitePool,
    cache: Arc<CacheStore>,
}

impl DailyStatsEngine {
    pub fn new(read_pool: SqlitePool, write_pool: SqlitePool, cache: Arc<CacheStore>) -> Self {
        Self {
            read_pool,
            write_pool,
            cache,
        }
    }

    /// Fold one committed draw into its day's counters.
    pub async fn apply(&self, draw: &Draw) -> Result<()> {
        let date = date_key(draw.open_time);
        let marker = keys::daily_marker(&date, &draw.issue);

        match self.cache.get(&marker).await {
            Ok(Some(_)) => {
                debug!(issue = %draw.issue, date = %date, "daily stats already applied");
                return Ok(());
            }
            Ok(None) => {}
            // marker unreadable: proceed, the data path must keep working
            Err(e) => debug!("daily idempotency marker unreadable: {e}"),
        }

        self.increment(&date, draw).await?;

        let ttl = secs_until_midnight(Utc::now());
        if let Err(e) = self.cache.set_ex(&marker, b"1", ttl).await {
            debug!("daily idempotency marker not written: {e}");
        }
        Ok(())
    }

    async fn increment(&self, date: &str, draw: &Draw) -> Result<()> {
        let held = held_categories(draw);
        let now = now_ns();
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO daily_stats (date, category, count, updated_at) ");
        qb.push_values(held.iter(), |mut b, category| {
            b.push_bind(date).push_bind(*category).push_bind(1i64).push_bind(now);
        });
        qb.push(
            " ON CONFLICT(date, category) DO UPDATE SET \
             count = daily_stats.count + 1, updated_at = excluded.updated_at",
        );
        qb.build().execute(&self.write_pool).await?;
        Ok(())
    }

    /// Truncate one day's counters, rescan its committed draws oldest-first,
    /// re-apply, and clear the idempotency markers. Manually invoked only.
    pub async fn rebuild(&self, date: &str) -> Result<u64> {
        let Some((start, end)) = day_bounds(date) else {
            return Err(crate::error::AppError::InvalidDraw(format!(
                "{date} is not a calendar date"
            )));
        };

        sqlx::query("DELETE FROM daily_stats WHERE date = ?")
            .bind(date)
            .execute(&self.write_pool)
            .await?;

        let rows = crate::db::draws_between(&self.read_pool, start, end).await?;
        let replayed = rows.len() as u64;
        for row in rows {
            let draw = row.into_draw();
            self.increment(date, &draw).await?;
        }

        if let Err(e) = self.cache.scan_delete(&keys::daily_marker_pattern(date)).await {
            debug!("daily marker sweep skipped: {e}");
        }

        info!(date, replayed, "daily stats rebuilt");
        Ok(replayed)
    }

    pub async fn snapshot(&self, date: &str) -> Result<Vec<crate::db::models::DailyStatRow>> {
        let rows = sqlx::query_as::<_, crate::db::models::DailyStatRow>(
            "SELECT date, category, count FROM daily_stats WHERE date = ? ORDER BY category",
        )
        .bind(date)
        .fetch_all(&self.read_pool)
        .await?;
        Ok(rows)
    }
}
