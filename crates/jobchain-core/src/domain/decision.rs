//! Decision model: retry or give up after a failed attempt.

use std::time::Duration;

use super::errors::ExecutionError;
use super::run::JobRun;
use crate::coordinator::RetryPolicy;

/// The next action to take for a failed job.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Retry the job after a delay.
    Retry { delay: Duration, reason: String },

    /// Give up: the job becomes FAILED.
    MarkFailed { reason: String },
}

/// Deciders are pure functions: given the run record and the failure,
/// they return the next action without side effects.
/// 決定の適用（状態遷移、retry timer 登録）は coordinator が行う。
pub trait Decider: Send + Sync {
    fn decide(&self, run: &JobRun, error: &ExecutionError, backoff: &RetryPolicy) -> Decision;
}

/// Attempt-budget decider:
/// - Retry if the error is retryable and attempts < max_retries + 1
/// - Otherwise mark failed
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecider;

impl Decider for DefaultDecider {
    fn decide(&self, run: &JobRun, error: &ExecutionError, backoff: &RetryPolicy) -> Decision {
        let max_attempts = run.max_attempts();
        if !error.is_retryable() {
            return Decision::MarkFailed {
                reason: format!("not retryable: {error}"),
            };
        }
        if run.attempts >= max_attempts {
            return Decision::MarkFailed {
                reason: format!("max attempts reached: {}/{}", run.attempts, max_attempts),
            };
        }
        let delay = backoff.next_delay(run.attempts);
        Decision::Retry {
            delay,
            reason: format!(
                "retry attempt {}/{} after {:?}",
                run.attempts + 1,
                max_attempts,
                delay
            ),
        }
    }
}
