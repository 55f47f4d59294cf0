//! JobRun: 1 ジョブの実行時レコード
//!
//! Design:
//! - チェーン内のジョブごとに 1 つ。変更するのは coordinator だけ。
//! - 状態遷移はすべてここのメソッドを通し、`JobState::can_transition_to` で検査する。
//! - 不正な遷移は `TransitionError` を返し、レコードは一切変更しない。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attempt::{AttemptRecord, DecisionRecord};
use super::errors::{FailureReason, TransitionError};
use super::ids::{AttemptId, JobId};
use super::outcome::{JobOutput, OutcomeKind};
use super::spec::JobSpec;
use super::state::JobState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub job_id: JobId,
    pub state: JobState,

    /// 開始した試行の数（実行中の試行を含む）
    pub attempts: u32,

    pub max_retries: u32,

    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,

    pub last_failure: Option<FailureReason>,

    /// RETRY_PENDING のとき、次に READY になれる時刻
    pub next_eligible_at: Option<DateTime<Utc>>,

    /// 最後に成功した試行の成果物
    pub artifact: Option<serde_json::Value>,

    #[serde(default)]
    pub history: Vec<AttemptRecord>,

    #[serde(default)]
    pub decisions: Vec<DecisionRecord>,
}

impl JobRun {
    pub fn new(spec: &JobSpec) -> Self {
        Self {
            job_id: spec.id.clone(),
            state: JobState::Pending,
            attempts: 0,
            max_retries: spec.max_retries,
            last_started_at: None,
            last_finished_at: None,
            last_failure: None,
            next_eligible_at: None,
            artifact: None,
            history: Vec::new(),
            decisions: Vec::new(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    fn transition(&mut self, next: JobState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                job: self.job_id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// PENDING / RETRY_PENDING -> READY
    pub fn mark_ready(&mut self) -> Result<(), TransitionError> {
        self.transition(JobState::Ready)?;
        self.next_eligible_at = None;
        Ok(())
    }

    /// READY -> RUNNING. Returns the 1-based attempt number.
    pub fn start_attempt(
        &mut self,
        attempt_id: AttemptId,
        now: DateTime<Utc>,
    ) -> Result<u32, TransitionError> {
        self.transition(JobState::Running)?;
        self.attempts += 1;
        self.last_started_at = Some(now);
        self.last_finished_at = None;
        self.history
            .push(AttemptRecord::started(attempt_id, self.attempts, now));
        Ok(self.attempts)
    }

    /// RUNNING -> SUCCEEDED
    pub fn mark_succeeded(
        &mut self,
        output: JobOutput,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(JobState::Succeeded)?;
        self.artifact = output.artifact;
        self.last_failure = None;
        self.finish_attempt(now, OutcomeKind::Success, None);
        Ok(())
    }

    /// RUNNING -> RETRY_PENDING
    pub fn schedule_retry(
        &mut self,
        outcome: OutcomeKind,
        reason: FailureReason,
        next_eligible_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(JobState::RetryPending)?;
        self.next_eligible_at = Some(next_eligible_at);
        self.finish_attempt(now, outcome, Some(reason.clone()));
        self.last_failure = Some(reason);
        Ok(())
    }

    /// RUNNING -> FAILED
    pub fn mark_failed(
        &mut self,
        outcome: OutcomeKind,
        reason: FailureReason,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(JobState::Failed)?;
        self.finish_attempt(now, outcome, Some(reason.clone()));
        self.last_failure = Some(reason);
        Ok(())
    }

    /// PENDING -> SKIPPED
    pub fn mark_skipped(&mut self, upstream: JobId) -> Result<(), TransitionError> {
        self.transition(JobState::Skipped)?;
        self.last_failure = Some(FailureReason::UpstreamFailed { job: upstream });
        Ok(())
    }

    /// PENDING / READY / RETRY_PENDING / RUNNING -> CANCELLED
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        let was_running = self.state == JobState::Running;
        self.transition(JobState::Cancelled)?;
        self.next_eligible_at = None;
        if was_running {
            self.finish_attempt(now, OutcomeKind::Cancelled, Some(FailureReason::Cancelled));
        }
        self.last_failure = Some(FailureReason::Cancelled);
        Ok(())
    }

    /// 再起動直後の正規化。遷移表を通らない唯一の経路。
    ///
    /// - READY -> PENDING（frontier は再計算する）
    /// - RUNNING -> 中断された試行を 1 回として数え、予算があれば即時 RETRY_PENDING、
    ///   なければ FAILED(Interrupted)
    /// - RETRY_PENDING -> 即時に再試行可能
    pub fn recover_after_restart(&mut self, now: DateTime<Utc>) {
        match self.state {
            JobState::Ready => self.state = JobState::Pending,
            JobState::Running => {
                self.finish_attempt(now, OutcomeKind::Interrupted, Some(FailureReason::Interrupted));
                self.last_failure = Some(FailureReason::Interrupted);
                let decision = if self.attempts < self.max_attempts() {
                    self.state = JobState::RetryPending;
                    self.next_eligible_at = Some(now);
                    "schedule_retry"
                } else {
                    self.state = JobState::Failed;
                    "mark_failed"
                };
                self.decisions.push(DecisionRecord::new(
                    serde_json::json!({ "interrupted_attempt": self.attempts }),
                    "restart_recovery",
                    decision,
                    None,
                    now,
                ));
            }
            JobState::RetryPending => self.next_eligible_at = Some(now),
            _ => {}
        }
    }

    fn finish_attempt(
        &mut self,
        now: DateTime<Utc>,
        outcome: OutcomeKind,
        failure: Option<FailureReason>,
    ) {
        self.last_finished_at = Some(now);
        if let Some(current) = self.history.last_mut()
            && current.finished_at.is_none()
        {
            current.finish(now, outcome, failure);
        }
    }
}
