//! Outcome model: what one attempt produced.

use serde::{Deserialize, Serialize};

use super::errors::ExecutionError;

/// handler の成功結果
///
/// `artifact` は直接の後続ジョブに `JobContext::upstream` として渡される。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<serde_json::Value>,
}

impl JobOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_artifact(artifact: serde_json::Value) -> Self {
        Self {
            artifact: Some(artifact),
        }
    }
}

/// 試行結果の種類（AttemptRecord に残す）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
    Timeout,
    Cancelled,
    /// 再起動で結果が失われた
    Interrupted,
}

impl OutcomeKind {
    pub fn of(result: &Result<JobOutput, ExecutionError>) -> Self {
        match result {
            Ok(_) => OutcomeKind::Success,
            Err(ExecutionError::HandlerFailure(_)) => OutcomeKind::Failure,
            Err(ExecutionError::Timeout(_)) => OutcomeKind::Timeout,
            Err(ExecutionError::Cancelled(_)) => OutcomeKind::Cancelled,
        }
    }
}
