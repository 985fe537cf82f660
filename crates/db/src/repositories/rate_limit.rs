use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{debug, info};

use super::{epoch_millis, RateLimiter, RepositoryError};
use crate::DbPool;

/// Sliding-window limiter keyed by caller.
///
/// Every request is recorded before the window is counted, so refused calls
/// also push the caller's window forward. The transaction opens with a write
/// which makes SQLite take the write lock up front; concurrent callers for the
/// same number serialize instead of both reading a stale count.
pub struct SqlRateLimiter {
    pool: DbPool,
}

impl SqlRateLimiter {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn allow_at(
        &self,
        caller_id: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let now_ms = epoch_millis(now);
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO rate_limit_hit (caller_id, hit_at) VALUES (?, ?)")
            .bind(caller_id)
            .bind(now_ms)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM rate_limit_hit WHERE caller_id = ? AND hit_at <= ?")
            .bind(caller_id)
            .bind(now_ms.saturating_sub(window_ms))
            .execute(&mut *tx)
            .await?;

        let count: i64 =
            sqlx::query("SELECT COUNT(*) AS hits FROM rate_limit_hit WHERE caller_id = ?")
                .bind(caller_id)
                .fetch_one(&mut *tx)
                .await?
                .try_get("hits")?;

        sqlx::query(
            "INSERT INTO rate_limit_bucket (caller_id, expires_at) VALUES (?, ?)
             ON CONFLICT(caller_id) DO UPDATE SET expires_at = excluded.expires_at",
        )
        .bind(caller_id)
        .bind(now_ms.saturating_add(window_ms.saturating_mul(2)))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let allowed = count <= i64::from(limit);
        debug!(
            event_name = "rate_limit.checked",
            caller_id,
            hits = count,
            limit,
            allowed,
            "rate limit window evaluated"
        );
        Ok(allowed)
    }

    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let now_ms = epoch_millis(now);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM rate_limit_hit
             WHERE caller_id IN (SELECT caller_id FROM rate_limit_bucket WHERE expires_at < ?)",
        )
        .bind(now_ms)
        .execute(&mut *tx)
        .await?;

        let buckets = sqlx::query("DELETE FROM rate_limit_bucket WHERE expires_at < ?")
            .bind(now_ms)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        if buckets > 0 {
            info!(event_name = "rate_limit.purged", buckets, "idle rate limit buckets purged");
        }
        Ok(buckets)
    }
}

#[async_trait::async_trait]
impl RateLimiter for SqlRateLimiter {
    async fn allow(
        &self,
        caller_id: &str,
        limit: u32,
        window: Duration,
    ) -> Result<bool, RepositoryError> {
        self.allow_at(caller_id, limit, window, Utc::now()).await
    }

    async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        self.purge_expired_at(Utc::now()).await
    }
}
