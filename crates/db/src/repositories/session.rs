use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use tracing::{debug, info, warn};

use callflow_core::domain::session::{CallSession, SessionId};
use callflow_core::errors::SessionError;

use super::{epoch_millis, RepositoryError, SessionMutation, SessionStore};
use crate::DbPool;

const DEFAULT_CONFLICT_BACKOFF: Duration = Duration::from_millis(20);
const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 50;

/// SQLite-backed session store.
///
/// Writes go through a version-checked `UPDATE ... WHERE version = ?`; a
/// writer that loses the race re-reads and retries. Expiry is tracked in
/// `expires_at` and enforced on read, with [`SessionStore::purge_expired`]
/// sweeping rows nobody reads again.
pub struct SqlSessionStore {
    pool: DbPool,
    timeout: chrono::Duration,
    max_interactions: u32,
    conflict_backoff: Duration,
    max_write_attempts: u32,
}

enum Lookup {
    Live(CallSession),
    Stale(&'static str),
}

impl SqlSessionStore {
    pub fn new(pool: DbPool, timeout: Duration, max_interactions: u32) -> Self {
        Self {
            pool,
            timeout: chrono::Duration::seconds(timeout.as_secs() as i64),
            max_interactions,
            conflict_backoff: DEFAULT_CONFLICT_BACKOFF,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
        }
    }

    pub fn with_conflict_policy(mut self, backoff: Duration, max_write_attempts: u32) -> Self {
        self.conflict_backoff = backoff;
        self.max_write_attempts = max_write_attempts.max(1);
        self
    }

    pub async fn create_at(
        &self,
        session: &CallSession,
        now: DateTime<Utc>,
    ) -> Result<CallSession, RepositoryError> {
        let payload = encode(session)?;
        let timestamp = now.to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM call_session
             WHERE (session_id = ? OR call_id = ?) AND expires_at < ?",
        )
        .bind(session.session_id.as_str())
        .bind(&session.call_id)
        .bind(epoch_millis(now))
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            "INSERT INTO call_session (
                session_id,
                call_id,
                caller_id,
                callee_id,
                payload_json,
                interaction_count,
                end_of_conversation,
                version,
                created_at,
                updated_at,
                expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)",
        )
        .bind(session.session_id.as_str())
        .bind(&session.call_id)
        .bind(&session.caller_id)
        .bind(&session.callee_id)
        .bind(payload)
        .bind(i64::from(session.interaction_count))
        .bind(session.end_of_conversation)
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(self.expires_at(session))
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                return Err(SessionError::AlreadyExists(session.call_id.clone()).into());
            }
            Err(error) => return Err(error.into()),
        }
        tx.commit().await?;

        info!(
            event_name = "session.created",
            session_id = %session.session_id,
            correlation_id = %session.call_id,
            "call session created"
        );

        let mut stored = session.clone();
        stored.version = 1;
        Ok(stored)
    }

    pub async fn load_at(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<CallSession>, RepositoryError> {
        let row = sqlx::query(
            "SELECT session_id, payload_json, version FROM call_session WHERE session_id = ?",
        )
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        self.resolve(row, now).await
    }

    pub async fn load_by_call_at(
        &self,
        call_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CallSession>, RepositoryError> {
        let row = sqlx::query(
            "SELECT session_id, payload_json, version FROM call_session WHERE call_id = ?",
        )
        .bind(call_id)
        .fetch_optional(&self.pool)
        .await?;

        self.resolve(row, now).await
    }

    pub async fn increment_interaction_at(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<CallSession, RepositoryError> {
        let increment = |session: &mut CallSession| {
            session.interaction_count = session.interaction_count.saturating_add(1);
            session.last_interaction_time = now;
            Ok(())
        };
        self.compare_and_swap(session_id, now, &increment).await
    }

    pub async fn update_at(
        &self,
        session_id: &SessionId,
        mutate: &SessionMutation<'_>,
        now: DateTime<Utc>,
    ) -> Result<CallSession, RepositoryError> {
        self.compare_and_swap(session_id, now, mutate).await
    }

    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM call_session WHERE expires_at < ?")
            .bind(epoch_millis(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn compare_and_swap(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
        mutate: &SessionMutation<'_>,
    ) -> Result<CallSession, RepositoryError> {
        for attempt in 1..=self.max_write_attempts {
            let row = sqlx::query(
                "SELECT session_id, payload_json, version FROM call_session WHERE session_id = ?",
            )
            .bind(session_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else {
                return Err(SessionError::NotFound(session_id.clone()).into());
            };
            let mut session = match self.inspect(&row, now)? {
                Lookup::Live(session) => session,
                Lookup::Stale(reason) => {
                    self.purge(session_id, reason).await?;
                    return Err(SessionError::NotFound(session_id.clone()).into());
                }
            };
            if session.end_of_conversation {
                return Err(SessionError::Ended(session_id.clone()).into());
            }

            let expected_version = session.version;
            mutate(&mut session)?;

            if session.exceeds_interactions(self.max_interactions) {
                let deleted =
                    sqlx::query("DELETE FROM call_session WHERE session_id = ? AND version = ?")
                        .bind(session_id.as_str())
                        .bind(expected_version)
                        .execute(&self.pool)
                        .await?;
                if deleted.rows_affected() == 1 {
                    warn!(
                        event_name = "session.limit_exceeded",
                        session_id = %session_id,
                        correlation_id = %session.call_id,
                        max_interactions = self.max_interactions,
                        "interaction cap exceeded, session deleted"
                    );
                    return Err(SessionError::LimitExceeded {
                        session_id: session_id.clone(),
                        max_interactions: self.max_interactions,
                    }
                    .into());
                }
            } else {
                let updated = sqlx::query(
                    "UPDATE call_session
                     SET payload_json = ?,
                         interaction_count = ?,
                         end_of_conversation = ?,
                         version = version + 1,
                         updated_at = ?,
                         expires_at = ?
                     WHERE session_id = ? AND version = ?",
                )
                .bind(encode(&session)?)
                .bind(i64::from(session.interaction_count))
                .bind(session.end_of_conversation)
                .bind(now.to_rfc3339())
                .bind(self.expires_at(&session))
                .bind(session_id.as_str())
                .bind(expected_version)
                .execute(&self.pool)
                .await?;

                if updated.rows_affected() == 1 {
                    session.version = expected_version + 1;
                    return Ok(session);
                }
            }

            debug!(
                event_name = "session.write_conflict",
                session_id = %session_id,
                attempt,
                "concurrent session write detected, retrying"
            );
            tokio::time::sleep(self.conflict_backoff.saturating_mul(attempt.min(5))).await;
        }

        Err(SessionError::Conflict {
            session_id: session_id.clone(),
            attempts: self.max_write_attempts,
        }
        .into())
    }

    async fn resolve(
        &self,
        row: Option<SqliteRow>,
        now: DateTime<Utc>,
    ) -> Result<Option<CallSession>, RepositoryError> {
        let Some(row) = row else {
            return Ok(None);
        };

        match self.inspect(&row, now)? {
            Lookup::Live(session) => Ok(Some(session)),
            Lookup::Stale(reason) => {
                let session_id = SessionId(row.try_get("session_id")?);
                self.purge(&session_id, reason).await?;
                Ok(None)
            }
        }
    }

    fn inspect(&self, row: &SqliteRow, now: DateTime<Utc>) -> Result<Lookup, RepositoryError> {
        let payload: String = row.try_get("payload_json")?;
        let version: i64 = row.try_get("version")?;

        let mut session = match serde_json::from_str::<CallSession>(&payload) {
            Ok(session) => session,
            Err(error) => {
                warn!(
                    event_name = "session.decode_failed",
                    error = %error,
                    "stored session payload could not be decoded"
                );
                return Ok(Lookup::Stale("undecodable"));
            }
        };
        session.version = version;

        if session.is_expired(self.timeout, now) {
            return Ok(Lookup::Stale("expired"));
        }
        if session.exceeds_interactions(self.max_interactions) {
            return Ok(Lookup::Stale("interaction_limit"));
        }
        Ok(Lookup::Live(session))
    }

    async fn purge(&self, session_id: &SessionId, reason: &'static str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM call_session WHERE session_id = ?")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await?;
        info!(event_name = "session.purged", session_id = %session_id, reason, "stale session purged");
        Ok(())
    }

    fn expires_at(&self, session: &CallSession) -> i64 {
        epoch_millis(session.last_interaction_time + self.timeout)
    }
}

#[async_trait::async_trait]
impl SessionStore for SqlSessionStore {
    async fn create(&self, session: &CallSession) -> Result<CallSession, RepositoryError> {
        self.create_at(session, Utc::now()).await
    }

    async fn load(&self, session_id: &SessionId) -> Result<Option<CallSession>, RepositoryError> {
        self.load_at(session_id, Utc::now()).await
    }

    async fn load_by_call(&self, call_id: &str) -> Result<Option<CallSession>, RepositoryError> {
        self.load_by_call_at(call_id, Utc::now()).await
    }

    async fn increment_interaction(
        &self,
        session_id: &SessionId,
    ) -> Result<CallSession, RepositoryError> {
        self.increment_interaction_at(session_id, Utc::now()).await
    }

    async fn update(
        &self,
        session_id: &SessionId,
        mutate: &SessionMutation<'_>,
    ) -> Result<CallSession, RepositoryError> {
        self.update_at(session_id, mutate, Utc::now()).await
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM call_session WHERE session_id = ?")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        self.purge_expired_at(Utc::now()).await
    }
}

fn encode(session: &CallSession) -> Result<String, RepositoryError> {
    serde_json::to_string(session)
        .map_err(|error| RepositoryError::Decode(format!("could not encode session: {error}")))
}
