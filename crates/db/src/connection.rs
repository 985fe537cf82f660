use std::time::{Duration, Instant};

use sqlx::sqlite::SqlitePoolOptions;
use tracing::{info, warn};

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self { max_retries, ..Self::default() }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Connects, retrying with exponential backoff while the store is unreachable.
pub async fn connect_with_retry(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
    policy: &ReconnectPolicy,
) -> Result<DbPool, sqlx::Error> {
    let mut attempt = 0;
    loop {
        match connect_with_settings(database_url, max_connections, timeout_secs).await {
            Ok(pool) => {
                if attempt > 0 {
                    info!(
                        event_name = "system.database.reconnected",
                        attempt,
                        "database connection established after retry"
                    );
                }
                return Ok(pool);
            }
            Err(error) if attempt < policy.max_retries => {
                let delay = policy.backoff(attempt);
                warn!(
                    event_name = "system.database.connect_retry",
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "database connection failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Round-trips a trivial query and reports how long it took.
pub async fn ping(pool: &DbPool) -> Result<Duration, sqlx::Error> {
    let started = Instant::now();
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(started.elapsed())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{connect_with_retry, connect_with_settings, ping, ReconnectPolicy};

    #[test]
    fn reconnect_backoff_is_capped() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(250));
        assert_eq!(policy.backoff(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(10), Duration::from_millis(5_000));
    }

    #[tokio::test]
    async fn ping_reports_latency_for_open_pool() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        let latency = ping(&pool).await.expect("ping");
        assert!(latency < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn ping_fails_for_closed_pool() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        pool.close().await;
        assert!(ping(&pool).await.is_err());
    }

    #[tokio::test]
    async fn connect_with_retry_gives_up_after_policy_is_exhausted() {
        let policy = ReconnectPolicy { max_retries: 2, base_delay_ms: 1, max_delay_ms: 2 };
        let result = connect_with_retry(
            "sqlite:///nonexistent-callflow-dir/never/created.db",
            1,
            1,
            &policy,
        )
        .await;
        assert!(result.is_err());
    }
}
