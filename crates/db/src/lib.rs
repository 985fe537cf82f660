pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod sweeper;

pub use connection::{
    connect, connect_with_retry, connect_with_settings, ping, DbPool, ReconnectPolicy,
};
pub use repositories::{
    DeadLetterRepository, RateLimiter, RepositoryError, SessionStore, SqlDeadLetterRepository,
    SqlRateLimiter, SqlSessionStore,
};
pub use sweeper::{SweepReport, Sweeper};
