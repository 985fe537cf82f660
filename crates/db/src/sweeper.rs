//! Periodic purge of expired sessions and idle rate-limit buckets.
//!
//! Reads already treat expired rows as absent; the sweeper only reclaims
//! storage for calls nobody touches again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::repositories::{RateLimiter, SessionStore};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: u64,
    pub rate_limit_buckets: u64,
}

pub struct Sweeper {
    sessions: Arc<dyn SessionStore>,
    rate_limiter: Arc<dyn RateLimiter>,
    every: Duration,
}

impl Sweeper {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        rate_limiter: Arc<dyn RateLimiter>,
        every: Duration,
    ) -> Self {
        Self { sessions, rate_limiter, every: every.max(Duration::from_secs(1)) }
    }

    /// One pass over both stores. A failure in one store does not skip the other.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.sessions.purge_expired().await {
            Ok(purged) => report.sessions = purged,
            Err(error) => warn!(
                event_name = "sweeper.sessions_failed",
                error = %error,
                "expired session purge failed"
            ),
        }
        match self.rate_limiter.purge_expired().await {
            Ok(purged) => report.rate_limit_buckets = purged,
            Err(error) => warn!(
                event_name = "sweeper.rate_limit_failed",
                error = %error,
                "rate limit bucket purge failed"
            ),
        }

        if report != SweepReport::default() {
            info!(
                event_name = "sweeper.pass_completed",
                sessions = report.sessions,
                rate_limit_buckets = report.rate_limit_buckets,
                "expired records purged"
            );
        } else {
            debug!(event_name = "sweeper.pass_completed", "nothing to purge");
        }
        report
    }

    /// Runs until the returned handle is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            info!(
                event_name = "sweeper.started",
                interval_secs = self.every.as_secs(),
                "expiry sweeper started"
            );
            loop {
                ticker.tick().await;
                self.sweep_once().await;
            }
        })
    }
}
