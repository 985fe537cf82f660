use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use callflow_core::domain::dead_letter::DeadLetterEntry;
use callflow_core::domain::session::{CallSession, SessionId};
use callflow_core::errors::SessionError;

pub mod dead_letter;
pub mod rate_limit;
pub mod session;

pub use dead_letter::SqlDeadLetterRepository;
pub use rate_limit::SqlRateLimiter;
pub use session::SqlSessionStore;

pub const DEFAULT_DEAD_LETTER_PAGE: u32 = 50;
pub const MAX_DEAD_LETTER_PAGE: u32 = 500;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    /// No connection could be had at all: the pool is closed or exhausted.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Unavailable(error.to_string())
            }
            other => Self::Database(other),
        }
    }
}

/// Mutation applied inside the store's compare-and-swap loop. It may run more
/// than once when concurrent writers race, so it must be deterministic.
pub type SessionMutation<'a> =
    dyn Fn(&mut CallSession) -> Result<(), SessionError> + Send + Sync + 'a;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &CallSession) -> Result<CallSession, RepositoryError>;
    async fn load(&self, session_id: &SessionId) -> Result<Option<CallSession>, RepositoryError>;
    async fn load_by_call(&self, call_id: &str) -> Result<Option<CallSession>, RepositoryError>;
    async fn increment_interaction(
        &self,
        session_id: &SessionId,
    ) -> Result<CallSession, RepositoryError>;
    async fn update(
        &self,
        session_id: &SessionId,
        mutate: &SessionMutation<'_>,
    ) -> Result<CallSession, RepositoryError>;
    async fn delete(&self, session_id: &SessionId) -> Result<(), RepositoryError>;
    async fn purge_expired(&self) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Records one hit for `caller_id` and reports whether it stays within
    /// `limit` hits over the trailing `window`.
    async fn allow(
        &self,
        caller_id: &str,
        limit: u32,
        window: Duration,
    ) -> Result<bool, RepositoryError>;
    async fn purge_expired(&self) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait DeadLetterRepository: Send + Sync {
    async fn record(&self, entry: &DeadLetterEntry) -> Result<(), RepositoryError>;
    /// Newest first, at most `limit` (clamped to [`MAX_DEAD_LETTER_PAGE`]).
    async fn list(&self, limit: u32) -> Result<Vec<DeadLetterEntry>, RepositoryError>;
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn epoch_millis(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}
