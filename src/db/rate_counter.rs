use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

use crate::error::StoreError;
use crate::rate_limit::CounterStore;

/// Fixed-window counters kept in the shared database, so every worker that
/// opens the same store sees the same counts.
#[derive(Clone)]
pub struct SqliteCounterStore {
    pool: SqlitePool,
}

impl SqliteCounterStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    /// Increment and read in one statement. A counter whose window has ended is
    /// restarted at 1 with a freshly armed window.
    async fn incr(&self, key: &str, window_secs: i64, now: i64) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "INSERT INTO rate_counters (key, count, window_ends_at) VALUES (?1, 1, ?2 + ?3)
             ON CONFLICT(key) DO UPDATE SET
                 count = CASE WHEN window_ends_at <= ?2 THEN 1 ELSE count + 1 END,
                 window_ends_at = CASE WHEN window_ends_at <= ?2 THEN ?2 + ?3 ELSE window_ends_at END
             RETURNING count",
        )
        .bind(key)
        .bind(now)
        .bind(window_secs)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn purge_elapsed(&self, now: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM rate_counters WHERE window_ends_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
