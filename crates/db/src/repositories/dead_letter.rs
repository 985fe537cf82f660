use sqlx::{sqlite::SqliteRow, Row};
use tracing::error;

use callflow_core::domain::dead_letter::{DeadLetterEntry, DeadLetterId};
use callflow_core::domain::session::SlotValues;

use super::{parse_timestamp, DeadLetterRepository, RepositoryError, MAX_DEAD_LETTER_PAGE};
use crate::DbPool;

pub struct SqlDeadLetterRepository {
    pool: DbPool,
}

impl SqlDeadLetterRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DeadLetterRepository for SqlDeadLetterRepository {
    async fn record(&self, entry: &DeadLetterEntry) -> Result<(), RepositoryError> {
        let slots_json = serde_json::to_string(&entry.slots_filled).map_err(|error| {
            RepositoryError::Decode(format!("could not encode dead letter slots: {error}"))
        })?;

        sqlx::query(
            "INSERT INTO dead_letter (
                id,
                call_id,
                caller_id,
                callee_id,
                slots_json,
                error,
                recording_url,
                recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id.0)
        .bind(&entry.call_id)
        .bind(&entry.caller_id)
        .bind(&entry.callee_id)
        .bind(slots_json)
        .bind(&entry.error)
        .bind(entry.recording_url.as_deref())
        .bind(entry.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        error!(
            event_name = "dead_letter.recorded",
            dead_letter_id = %entry.id.0,
            correlation_id = %entry.call_id,
            error = %entry.error,
            "call failure captured for review"
        );
        Ok(())
    }

    async fn list(&self, limit: u32) -> Result<Vec<DeadLetterEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, call_id, caller_id, callee_id, slots_json, error, recording_url, recorded_at
             FROM dead_letter
             ORDER BY seq DESC
             LIMIT ?",
        )
        .bind(i64::from(limit.min(MAX_DEAD_LETTER_PAGE)))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<DeadLetterEntry, RepositoryError> {
    let slots_json: String = row.try_get("slots_json")?;
    let slots_filled: SlotValues = serde_json::from_str(&slots_json).map_err(|error| {
        RepositoryError::Decode(format!("invalid dead letter slots_json: {error}"))
    })?;

    Ok(DeadLetterEntry {
        id: DeadLetterId(row.try_get("id")?),
        call_id: row.try_get("call_id")?,
        caller_id: row.try_get("caller_id")?,
        callee_id: row.try_get("callee_id")?,
        slots_filled,
        recorded_at: parse_timestamp("recorded_at", row.try_get("recorded_at")?)?,
        error: row.try_get("error")?,
        recording_url: row.try_get("recording_url")?,
    })
}

#[cfg(test)]
mod tests {
    use callflow_core::domain::dead_letter::{DeadLetterEntry, INVALID_RECORDING_URL};
    use callflow_core::domain::session::SlotValues;

    use super::SqlDeadLetterRepository;
    use crate::repositories::{DeadLetterRepository, RepositoryError, MAX_DEAD_LETTER_PAGE};
    use crate::{connect_with_settings, migrations, DbPool};

    #[tokio::test]
    async fn recorded_entries_round_trip_newest_first() {
        let pool = setup_pool().await;
        let repo = SqlDeadLetterRepository::new(pool.clone());

        let mut slots = SlotValues::new();
        slots.insert("tenant_name".to_string(), "Asha".to_string());
        let first = DeadLetterEntry::new(
            "CA-1",
            "+919876543210",
            "+918000000001",
            slots,
            INVALID_RECORDING_URL,
            Some("http://insecure.example/rec.wav".to_string()),
        );
        let second = DeadLetterEntry::new(
            "CA-2",
            "+919876543211",
            "+918000000001",
            SlotValues::new(),
            "transcription failed",
            None,
        );
        repo.record(&first).await.expect("record first");
        repo.record(&second).await.expect("record second");

        let listed = repo.list(10).await.expect("list");

        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].call_id, "CA-2");
        assert_eq!(listed[0].recording_url, None);
        assert_eq!(listed[1].id, first.id);
        assert_eq!(listed[1].slots_filled.get("tenant_name").map(String::as_str), Some("Asha"));
        assert_eq!(listed[1].recording_url.as_deref(), Some("http://insecure.example/rec.wav"));
        pool.close().await;
    }

    #[tokio::test]
    async fn list_honours_limit_and_clamps_oversized_pages() {
        let pool = setup_pool().await;
        let repo = SqlDeadLetterRepository::new(pool.clone());
        for index in 0..3 {
            let entry = DeadLetterEntry::new(
                format!("CA-{index}"),
                "+919876543210",
                "+918000000001",
                SlotValues::new(),
                "boom",
                None,
            );
            repo.record(&entry).await.expect("record");
        }

        let page = repo.list(2).await.expect("limited list");
        assert_eq!(page.iter().map(|entry| entry.call_id.as_str()).collect::<Vec<_>>(), ["CA-2", "CA-1"]);

        let clamped = repo.list(MAX_DEAD_LETTER_PAGE * 4).await.expect("clamped list");
        assert_eq!(clamped.len(), 3);
        pool.close().await;
    }

    #[tokio::test]
    async fn closed_pool_reports_store_unavailable() {
        let pool = setup_pool().await;
        let repo = SqlDeadLetterRepository::new(pool.clone());
        pool.close().await;

        let result = repo.list(10).await;

        assert!(matches!(result, Err(RepositoryError::Unavailable(_))));
    }

    #[tokio::test]
    async fn missing_table_is_a_database_error() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        let repo = SqlDeadLetterRepository::new(pool.clone());

        let result = repo.list(10).await;

        assert!(matches!(result, Err(RepositoryError::Database(_))));
        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }
}
