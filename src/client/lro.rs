//! Long-running operation polling.
//!
//! ARM acknowledges slow writes with `201`/`202` and a status URL. The poller
//! checks that URL with bounded exponential backoff until the operation
//! reaches a terminal status, the deadline passes, or the caller cancels.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Polling schedule for long-running operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Delay before the second status check.
    #[serde(with = "humantime_serde")]
    pub initial_interval: Duration,
    /// Upper bound on the delay between checks.
    #[serde(with = "humantime_serde")]
    pub max_interval: Duration,
    /// Growth factor applied to the delay after every check.
    pub multiplier: f64,
    /// Give up after this long.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
            multiplier: 1.5,
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl PollPolicy {
    /// Delay after `interval`, capped at `max_interval`.
    pub fn next_interval(&self, interval: Duration) -> Duration {
        interval.mul_f64(self.multiplier.max(1.0)).min(self.max_interval)
    }
}

/// Status of a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    /// Still running; the service may suggest when to check again.
    InProgress { retry_after: Option<Duration> },
    Succeeded,
    Failed(String),
    Canceled,
}

impl OperationStatus {
    /// Interpret an ARM status string (`Succeeded`, `Failed`, `Canceled`, or
    /// anything else for in-progress).
    pub fn from_arm(status: &str, failure_message: Option<&str>) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "succeeded" => OperationStatus::Succeeded,
            "failed" => OperationStatus::Failed(
                failure_message
                    .map(str::to_string)
                    .unwrap_or_else(|| "operation reported status Failed".to_string()),
            ),
            "canceled" | "cancelled" => OperationStatus::Canceled,
            _ => OperationStatus::InProgress { retry_after: None },
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::InProgress { .. })
    }
}

/// Poll `check` until the operation finishes.
///
/// Returns [`Error::OperationFailed`] for a failed or canceled operation,
/// [`Error::OperationTimedOut`] once `policy.timeout` elapses, and
/// [`Error::Cancelled`] when `cancel` fires. Errors from `check` itself are
/// returned as is.
pub async fn poll_until_done<F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<OperationStatus>>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut interval = policy.initial_interval;
    let mut checks = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(operation.to_string()));
        }

        let status = check().await?;
        checks += 1;
        trace!(operation, checks, ?status, "polled operation status");

        let suggested = match status {
            OperationStatus::Succeeded => {
                debug!(operation, checks, "operation succeeded");
                return Ok(());
            }
            OperationStatus::Failed(reason) => return Err(Error::OperationFailed { reason }),
            OperationStatus::Canceled => {
                return Err(Error::OperationFailed {
                    reason: format!("operation '{operation}' was canceled by the service"),
                })
            }
            OperationStatus::InProgress { retry_after } => retry_after,
        };

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::OperationTimedOut {
                operation: operation.to_string(),
                timeout: policy.timeout,
            });
        }

        let wait = suggested
            .map(|hint| hint.min(policy.max_interval))
            .unwrap_or(interval)
            .min(deadline - now);

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled(operation.to_string())),
            _ = tokio::time::sleep(wait) => {}
        }

        interval = policy.next_interval(interval);
    }
}
