//! Transport-level retries for ARM requests.
//!
//! Only transient remote failures are retried: throttling (HTTP 429) and
//! server errors (5xx). A `Retry-After` hint from the service replaces the
//! computed backoff for that attempt. Everything else is returned to the
//! caller on the first failure; the reconciler itself never retries.
//!
//! # Example
//!
//! ```rust,ignore
//! use armctl::retry::{RetryPolicy, BackoffStrategy, JitterStrategy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(500))
//!     .backoff(BackoffStrategy::Exponential { multiplier: 2.0 })
//!     .jitter(JitterStrategy::Equal)
//!     .max_delay(Duration::from_secs(30))
//!     .build();
//!
//! let body = policy.execute(&cancel, "GET", || client.send(request.clone())).await?;
//! ```

use crate::error::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How the wait grows from one retry to the next.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BackoffStrategy {
    /// Always `initial_delay`.
    Constant,

    /// `initial_delay * (attempt + 1)`
    Linear,

    /// `initial_delay * multiplier^attempt`
    Exponential {
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential { multiplier: 2.0 }
    }
}

impl BackoffStrategy {
    /// Un-jittered wait before retry number `attempt` (0-based).
    pub fn calculate_delay(&self, attempt: u32, initial_delay: Duration) -> Duration {
        let base = initial_delay.as_millis() as f64;
        let factor = match self {
            Self::Constant => 1.0,
            Self::Linear => f64::from(attempt) + 1.0,
            Self::Exponential { multiplier } => multiplier.powf(f64::from(attempt)),
        };
        Duration::from_millis((base * factor).min(u64::MAX as f64) as u64)
    }
}

/// Randomization applied on top of the backoff so that concurrent callers
/// hitting the same throttled subscription do not retry in lockstep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No randomization.
    None,

    /// Anywhere in `[0, delay)`.
    Full,

    /// Half the delay plus a random share of the other half.
    #[default]
    Equal,
}

impl JitterStrategy {
    pub fn apply(&self, delay: Duration) -> Duration {
        let millis = delay.as_millis() as f64;
        if millis <= 0.0 {
            return delay;
        }
        let mut rng = rand::thread_rng();
        let jittered = match self {
            Self::None => millis,
            Self::Full => rng.gen_range(0.0..millis),
            Self::Equal => millis / 2.0 + rng.gen_range(0.0..millis / 2.0),
        };
        Duration::from_millis(jittered as u64)
    }
}

/// Retry settings for ARM requests, loaded from the `[retry]` config table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,

    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any single wait, `Retry-After` included.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Give up once the next wait would cross this budget.
    #[serde(with = "humantime_serde")]
    pub max_total_time: Option<Duration>,

    pub backoff: BackoffStrategy,

    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_total_time: None,
            backoff: BackoffStrategy::default(),
            jitter: JitterStrategy::default(),
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Backoff plus jitter for retry number `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.backoff.calculate_delay(attempt, self.initial_delay);
        self.jitter.apply(base_delay.min(self.max_delay))
    }

    /// Delay before retrying after `error`, honoring a server `Retry-After`.
    fn delay_after(&self, error: &Error, attempt: u32) -> Duration {
        match error {
            Error::Remote(remote) => match remote.retry_after {
                Some(hint) => hint.min(self.max_delay),
                None => self.delay_for_attempt(attempt),
            },
            _ => self.delay_for_attempt(attempt),
        }
    }

    pub fn should_continue(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Whether `error` is worth another attempt.
    pub fn is_retryable(error: &Error) -> bool {
        matches!(error, Error::Remote(remote) if remote.is_transient())
    }

    /// Execute an async operation, retrying transient remote failures.
    ///
    /// Returns the last error once retries are exhausted, and
    /// [`Error::Cancelled`] when `cancel` fires while waiting between attempts.
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            debug!(
                operation = operation_name,
                "attempt {} of {}",
                attempt + 1,
                self.max_retries + 1
            );

            let error = match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(
                            operation = operation_name,
                            "succeeded after {} retries", attempt
                        );
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            if !Self::is_retryable(&error) || !self.should_continue(attempt) {
                return Err(error);
            }

            let delay = self.delay_after(&error, attempt);
            if let Some(max_total) = self.max_total_time {
                let remaining = max_total.saturating_sub(started.elapsed());
                if delay > remaining {
                    return Err(error);
                }
            }

            warn!(
                operation = operation_name,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "transient failure, retrying: {}",
                error
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled(operation_name.to_string()));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}

/// Fluent construction of a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.policy.max_retries = n;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn max_total_time(mut self, timeout: Duration) -> Self {
        self.policy.max_total_time = Some(timeout);
        self
    }

    pub fn backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.policy.backoff = strategy;
        self
    }

    pub fn jitter(mut self, strategy: JitterStrategy) -> Self {
        self.policy.jitter = strategy;
        self
    }

    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteOperationError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .jitter(JitterStrategy::None)
            .build()
    }

    #[test]
    fn test_backoff_delays() {
        let initial = Duration::from_millis(100);
        assert_eq!(
            BackoffStrategy::Constant.calculate_delay(3, initial),
            Duration::from_millis(100)
        );
        assert_eq!(
            BackoffStrategy::Linear.calculate_delay(2, initial),
            Duration::from_millis(300)
        );
        assert_eq!(
            BackoffStrategy::Exponential { multiplier: 2.0 }.calculate_delay(3, initial),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(5))
            .jitter(JitterStrategy::None)
            .build();
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let delay = Duration::from_millis(1000);
        for _ in 0..50 {
            assert!(JitterStrategy::Full.apply(delay) <= delay);
            let equal = JitterStrategy::Equal.apply(delay);
            assert!(equal >= Duration::from_millis(500) && equal <= delay);
        }
        assert_eq!(JitterStrategy::None.apply(delay), delay);
    }

    #[test]
    fn test_retry_after_is_capped() {
        let policy = fast_policy(3);
        let error: Error = RemoteOperationError::from_status(429, "slow down")
            .with_retry_after(Duration::from_secs(120))
            .into();
        assert_eq!(policy.delay_after(&error, 0), Duration::from_millis(5));
    }

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(RetryPolicy::is_retryable(
            &RemoteOperationError::from_status(429, "throttled").into()
        ));
        assert!(RetryPolicy::is_retryable(
            &RemoteOperationError::from_status(503, "unavailable").into()
        ));
        assert!(!RetryPolicy::is_retryable(
            &RemoteOperationError::from_status(409, "conflict").into()
        ));
        assert!(!RetryPolicy::is_retryable(&Error::MissingArgument(
            "name".into()
        )));
    }

    #[tokio::test]
    async fn test_execute_retries_throttling_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .execute(&CancellationToken::new(), "GET", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::from(RemoteOperationError::from_status(429, "throttled")))
                } else {
                    Ok::<_, Error>("done")
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let err = fast_policy(2)
            .execute(&CancellationToken::new(), "GET", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), Error>(RemoteOperationError::from_status(500, "boom").into())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Remote(ref e) if e.http_status == Some(500)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_does_not_retry_conflicts() {
        let calls = AtomicU32::new(0);
        let _ = fast_policy(5)
            .execute(&CancellationToken::new(), "PUT", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), Error>(RemoteOperationError::from_status(412, "etag mismatch").into())
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_respects_total_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::builder()
            .max_retries(10)
            .initial_delay(Duration::from_secs(5))
            .max_delay(Duration::from_secs(5))
            .max_total_time(Duration::from_secs(1))
            .jitter(JitterStrategy::None)
            .build();

        let err = policy
            .execute(&CancellationToken::new(), "GET", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), Error>(RemoteOperationError::from_status(503, "unavailable").into())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Remote(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_stops_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let policy = RetryPolicy::builder()
            .max_retries(3)
            .initial_delay(Duration::from_secs(60))
            .max_delay(Duration::from_secs(60))
            .build();

        let err = policy
            .execute(&cancel, "GET", || async {
                Err::<(), Error>(RemoteOperationError::from_status(503, "unavailable").into())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }
}
