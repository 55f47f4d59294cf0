//! Attempt and Decision models for execution history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::FailureReason;
use super::ids::AttemptId;
use super::outcome::OutcomeKind;

/// 1 回の試行の記録
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_id: AttemptId,

    /// 1 始まりの試行番号
    pub attempt: u32,

    pub started_at: DateTime<Utc>,

    /// 実行中なら None
    pub finished_at: Option<DateTime<Utc>>,

    pub outcome: Option<OutcomeKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
}

impl AttemptRecord {
    pub fn started(attempt_id: AttemptId, attempt: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            attempt_id,
            attempt,
            started_at,
            finished_at: None,
            outcome: None,
            failure: None,
        }
    }

    pub fn finish(
        &mut self,
        finished_at: DateTime<Utc>,
        outcome: OutcomeKind,
        failure: Option<FailureReason>,
    ) {
        self.finished_at = Some(finished_at);
        self.outcome = Some(outcome);
        self.failure = failure;
    }
}

/// A decision made by the coordinator.
///
/// Records:
/// - What observation led to this decision (trigger)
/// - What policy was applied
/// - What action was taken ("schedule_retry", "mark_failed", "skip", "interrupt")
///
/// 「なぜこのジョブは SKIPPED なのか」を snapshot から説明できるようにする。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub trigger: serde_json::Value,
    pub policy: String,
    pub decision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    pub decided_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(
        trigger: serde_json::Value,
        policy: impl Into<String>,
        decision: impl Into<String>,
        context: Option<serde_json::Value>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            trigger,
            policy: policy.into(),
            decision: decision.into(),
            context,
            decided_at,
        }
    }
}
