use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::errors::CollaboratorError;

/// Bounded retries with capped exponential backoff around one external call.
///
/// Each attempt is individually bounded by `attempt_timeout`; a timed-out
/// attempt counts as a retryable failure. With a `budget`, the attempts and
/// the sleeps between them together never run past it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub attempt_timeout: Duration,
    pub budget: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            attempt_timeout: Duration::from_secs(15),
            budget: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, attempt_timeout: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), attempt_timeout, ..Self::default() }
    }

    pub fn with_delays(mut self, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, CollaboratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            let attempt_timeout = match self.budget {
                Some(budget) => self.attempt_timeout.min(budget.saturating_sub(started.elapsed())),
                None => self.attempt_timeout,
            };
            let result = match tokio::time::timeout(attempt_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(CollaboratorError::Timeout {
                    operation,
                    timeout_secs: attempt_timeout.as_secs(),
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(error) => {
                    attempt += 1;
                    if attempt >= max_attempts || !error.is_retryable() {
                        return Err(error);
                    }

                    let delay = self.backoff(attempt - 1);
                    if let Some(budget) = self.budget {
                        if started.elapsed() + delay >= budget {
                            warn!(
                                event_name = "collaborator.retry_budget_exhausted",
                                operation,
                                attempt,
                                budget_ms = budget.as_millis() as u64,
                                error = %error,
                                "no time left for another attempt"
                            );
                            return Err(error);
                        }
                    }

                    warn!(
                        event_name = "collaborator.retry",
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "external call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::RetryPolicy;
    use crate::errors::{CollaboratorError, Failure};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(200)).with_delays(1, 5)
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(1), Duration::from_millis(2_000));
        assert_eq!(policy.backoff(3), Duration::from_millis(8_000));
        assert_eq!(policy.backoff(4), Duration::from_millis(10_000));
        assert_eq!(policy.backoff(40), Duration::from_millis(10_000));
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("transcribe", || {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(CollaboratorError::Transcription(Failure::transport("failed to connect")))
                    } else {
                        Ok("hello")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("hello"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("extract", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CollaboratorError::Extraction(Failure::malformed("response was not JSON"))) }
            })
            .await;

        assert!(matches!(result, Err(CollaboratorError::Extraction(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_attempts_time_out_and_exhaust_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(20)).with_delays(1, 1);
        let result: Result<(), _> = policy
            .run("transcribe", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(CollaboratorError::Timeout { operation: "transcribe", .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn budget_caps_total_time_across_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_secs(10))
            .with_delays(10, 10)
            .with_budget(Duration::from_millis(150));
        let started = Instant::now();

        let result: Result<(), _> = policy
            .run("transcribe", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(CollaboratorError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
        assert!(calls.load(Ordering::SeqCst) < 5);
    }

    #[tokio::test]
    async fn budget_stops_retries_that_could_not_finish_in_time() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_secs(1))
            .with_delays(500, 500)
            .with_budget(Duration::from_millis(200));

        let result: Result<(), _> = policy
            .run("extract", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CollaboratorError::Extraction(Failure::status("llm request", 503))) }
            })
            .await;

        assert!(matches!(result, Err(CollaboratorError::Extraction(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
