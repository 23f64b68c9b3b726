pub mod health;
pub mod models;
pub mod writer;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use models::DrawRow;

/// Separate read and write pools over the same database file. The read pool
/// carries the API and the stats/prediction queries; the write pool is kept
/// small so writers queue instead of thrashing the storage engine.
pub struct Pools {
    pub read: SqlitePool,
    pub write: SqlitePool,
}

pub async fn connect(cfg: &Config) -> Result<Pools> {
    let opts = SqliteConnectOptions::new()
        .filename(&cfg.db_path)
        .create_if_missing(true);

    let write = SqlitePoolOptions::new()
        .max_connections(cfg.db_write_pool_size)
        .connect_with(opts.clone())
        .await?;
    let read = SqlitePoolOptions::new()
        .max_connections(cfg.db_read_pool_size)
        .connect_with(opts)
        .await?;

    sqlx::migrate!("./migrations").run(&write).await?;
    info!(path = %cfg.db_path, "database ready");

    Ok(Pools { read, write })
}

/// Most recent committed draws, newest first.
pub async fn latest_draws(pool: &SqlitePool, limit: i64) -> Result<Vec<DrawRow>> {
    let rows = sqlx::query_as::<_, DrawRow>(
        "SELECT * FROM draws ORDER BY CAST(issue AS INTEGER) DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// One page of committed draws, newest first.
pub async fn draws_page_desc(pool: &SqlitePool, limit: i64, offset: i64) -> Result<Vec<DrawRow>> {
    let rows = sqlx::query_as::<_, DrawRow>(
        "SELECT * FROM draws ORDER BY CAST(issue AS INTEGER) DESC LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Committed draws whose open_time falls in `[start, end)`, oldest first.
pub async fn draws_between(pool: &SqlitePool, start: i64, end: i64) -> Result<Vec<DrawRow>> {
    let rows = sqlx::query_as::<_, DrawRow>(
        "SELECT * FROM draws WHERE open_time >= ? AND open_time < ? \
         ORDER BY CAST(issue AS INTEGER) ASC",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Shared in-memory database for unit tests; a single connection keeps every
/// statement on the same memory instance.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}
