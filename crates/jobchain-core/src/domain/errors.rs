//! Errors - ドメインのエラー分類
//!
//! - `GraphError`: チェーン定義の検証エラー（投入時に同期的に返る）
//! - `ExecutionError`: 1 回の試行の失敗（retry 対象）
//! - `CancellationError`: 意図的な中断（retry しない）
//! - `FailureReason`: JobRun に残す、直列化可能な失敗理由

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::ids::JobId;
use super::millis;
use super::state::JobState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("chain has no jobs")]
    EmptyChain,

    #[error("job id must not be blank")]
    BlankJobId,

    #[error("duplicate job id `{0}`")]
    DuplicateJobId(JobId),

    #[error("job `{job}` depends on unknown job `{dependency}`")]
    UnknownDependency { job: JobId, dependency: JobId },

    #[error("job `{job}` lists prerequisite `{dependency}` more than once")]
    DuplicateDependency { job: JobId, dependency: JobId },

    /// `members` は辺の向き（前提 → 後続）に並んだ循環の一例
    #[error("dependency cycle detected: {}", display_cycle(members))]
    CycleDetected { members: Vec<JobId> },
}

fn display_cycle(members: &[JobId]) -> String {
    let mut parts: Vec<&str> = members.iter().map(JobId::as_str).collect();
    if let Some(first) = members.first() {
        parts.push(first.as_str());
    }
    parts.join(" -> ")
}

/// 1 回の試行が返すエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("handler failed: {0}")]
    HandlerFailure(String),

    #[error("attempt exceeded its timeout of {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Cancelled(#[from] CancellationError),
}

impl ExecutionError {
    pub fn handler(message: impl Into<String>) -> Self {
        ExecutionError::HandlerFailure(message.into())
    }

    /// retry 予算を消費して再試行できる失敗か
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExecutionError::Cancelled(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("job was cancelled")]
pub struct CancellationError;

/// JobRun に記録する失敗理由
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    HandlerFailure { message: String },
    Timeout { after_ms: u64 },
    Cancelled,
    /// fail-fast で上流の `job` が失敗した
    UpstreamFailed { job: JobId },
    /// プロセス再起動で試行が中断された
    Interrupted,
}

impl From<&ExecutionError> for FailureReason {
    fn from(err: &ExecutionError) -> Self {
        match err {
            ExecutionError::HandlerFailure(message) => FailureReason::HandlerFailure {
                message: message.clone(),
            },
            ExecutionError::Timeout(after) => FailureReason::Timeout {
                after_ms: millis::saturating_millis(*after),
            },
            ExecutionError::Cancelled(_) => FailureReason::Cancelled,
        }
    }
}

/// 許可されていない状態遷移
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal transition for job `{job}`: {from} -> {to}")]
pub struct TransitionError {
    pub job: JobId,
    pub from: JobState,
    pub to: JobState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_closes_the_loop() {
        let err = GraphError::CycleDetected {
            members: vec![JobId::from("a"), JobId::from("b")],
        };
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn cancellation_is_not_retryable() {
        assert!(!ExecutionError::from(CancellationError).is_retryable());
        assert!(ExecutionError::handler("boom").is_retryable());
        assert!(ExecutionError::Timeout(Duration::from_millis(5)).is_retryable());
    }

    #[test]
    fn failure_reason_is_tagged() {
        let reason = FailureReason::from(&ExecutionError::Timeout(Duration::from_millis(250)));
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "timeout", "after_ms": 250 }));
    }

    #[test]
    fn huge_timeout_saturates_instead_of_wrapping() {
        let reason = FailureReason::from(&ExecutionError::Timeout(Duration::MAX));
        assert_eq!(reason, FailureReason::Timeout { after_ms: u64::MAX });
    }
}
