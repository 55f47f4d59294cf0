//! ChainState: 1 チェーンインスタンスの可変状態
//!
//! Design:
//! - JobRun の arena がこのチェーンの唯一の正本。queue 構造は index だけを持つ。
//! - 遷移と、それに伴う後続の再評価は同じ `&mut self` 呼び出しの中で完結する
//!   （呼び出し側はチェーンのロックを握っている）。
//! - ready queue には READY 遷移のときだけ積むので、同じジョブが二重に入らない。

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{
    AttemptId, ChainId, ChainSnapshot, ChainStatus, Decider, Decision, DecisionRecord,
    ExecutionError, FailurePolicy, FailureReason, JobId, JobOutput, JobRun, JobState, OutcomeKind,
    TransitionError, millis,
};
use crate::error::{DispatchError, Result};
use crate::graph::JobChain;
use crate::observability::StateCounts;
use crate::scheduler;
use crate::supervisor;

/// Scheduled retry entry for the backoff heap.
///
/// We use Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledRetry {
    at: Instant,
    index: usize,
}

impl PartialOrd for ScheduledRetry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledRetry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// claim の結果（handler に渡すコンテキストの材料）
#[derive(Debug, Clone)]
pub(crate) struct Claim {
    pub index: usize,
    pub attempt: u32,
    pub attempt_id: AttemptId,
    pub upstream: BTreeMap<JobId, serde_json::Value>,
}

pub(crate) struct ChainState {
    chain_id: ChainId,
    chain: Arc<JobChain>,
    runs: Vec<JobRun>,
    counts: StateCounts,

    /// Ready queue (indices only).
    ready: VecDeque<usize>,

    /// Backoff timers for RETRY_PENDING jobs.
    scheduled: BinaryHeap<ScheduledRetry>,

    cancelled: bool,
    status: ChainStatus,
    revision: u64,
    submitted_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl ChainState {
    /// 新規投入: 全ジョブ PENDING から始め、根を READY にする
    pub(crate) fn new(chain_id: ChainId, chain: Arc<JobChain>, now: DateTime<Utc>) -> Self {
        let runs: Vec<JobRun> = chain.jobs().iter().map(JobRun::new).collect();
        let mut state = Self::from_parts(chain_id, chain, runs, now);
        state.reconcile(now);
        state
    }

    /// 再起動: 永続化された snapshot から作り直す
    ///
    /// 終端済みのジョブは再実行しない。READY は PENDING に戻し、RUNNING は中断として扱い、
    /// 最後に全体の照合を一度だけ行う。キャンセル済みチェーンの RUNNING はそのまま CANCELLED。
    pub(crate) fn restore(
        chain: Arc<JobChain>,
        snapshot: ChainSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if snapshot.failure_policy != chain.policy().failure_policy {
            return Err(DispatchError::SnapshotMismatch(format!(
                "failure policy {:?} does not match definition {:?}",
                snapshot.failure_policy,
                chain.policy().failure_policy
            )));
        }

        let mut by_id: BTreeMap<JobId, JobRun> = BTreeMap::new();
        for run in snapshot.jobs {
            let id = run.job_id.clone();
            if chain.index_of(id.as_str()).is_none() {
                return Err(DispatchError::SnapshotMismatch(format!(
                    "job `{id}` is not part of the chain definition"
                )));
            }
            if by_id.insert(id.clone(), run).is_some() {
                return Err(DispatchError::SnapshotMismatch(format!(
                    "job `{id}` appears twice in the snapshot"
                )));
            }
        }

        let cancelled = snapshot.status == ChainStatus::Cancelled;
        let mut runs = Vec::with_capacity(chain.len());
        for spec in chain.jobs() {
            let Some(mut run) = by_id.remove(&spec.id) else {
                return Err(DispatchError::SnapshotMismatch(format!(
                    "job `{}` is missing from the snapshot",
                    spec.id
                )));
            };
            if cancelled && run.state == JobState::Running {
                // キャンセル済みチェーンの中断は失敗ではなく CANCELLED
                run.mark_cancelled(now)?;
            } else {
                run.recover_after_restart(now);
            }
            runs.push(run);
        }

        let mut state = Self::from_parts(snapshot.chain_id, chain, runs, snapshot.submitted_at);
        state.revision = snapshot.revision;
        state.status = snapshot.status;
        state.finished_at = snapshot.finished_at;

        match snapshot.status {
            ChainStatus::Cancelled => {
                state.cancelled = true;
                state.cancel_waiting(now);
            }
            ChainStatus::Running => state.reconcile(now),
            _ => {}
        }
        state.revision += 1;

        info!(
            chain_id = %state.chain_id,
            status = %state.status,
            revision = state.revision,
            ready = state.ready.len(),
            "chain restored from snapshot"
        );
        Ok(state)
    }

    fn from_parts(
        chain_id: ChainId,
        chain: Arc<JobChain>,
        runs: Vec<JobRun>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        let counts = StateCounts::from_states(runs.iter().map(|r| r.state));
        Self {
            chain_id,
            chain,
            runs,
            counts,
            ready: VecDeque::new(),
            scheduled: BinaryHeap::new(),
            cancelled: false,
            status: ChainStatus::Running,
            revision: 0,
            submitted_at,
            finished_at: None,
        }
    }

    pub(crate) fn status(&self) -> ChainStatus {
        self.status
    }

    pub(crate) fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.counts.running
    }

    pub(crate) fn next_retry_at(&self) -> Option<Instant> {
        self.scheduled.peek().map(|entry| entry.at)
    }

    pub(crate) fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            chain_id: self.chain_id,
            status: self.status,
            failure_policy: self.chain.policy().failure_policy,
            revision: self.revision,
            submitted_at: self.submitted_at,
            finished_at: self.finished_at,
            jobs: self.runs.clone(),
        }
    }

    /// 遷移を 1 つ適用し、集計を合わせる
    fn apply<R>(
        &mut self,
        index: usize,
        op: impl FnOnce(&mut JobRun) -> Result<R, TransitionError>,
    ) -> Result<R, TransitionError> {
        let before = self.runs[index].state;
        let out = op(&mut self.runs[index])?;
        self.counts.moved(before, self.runs[index].state);
        Ok(out)
    }

    fn push_ready(&mut self, index: usize) -> Result<(), TransitionError> {
        self.apply(index, JobRun::mark_ready)?;
        self.ready.push_back(index);
        Ok(())
    }

    /// 全体の照合（投入時と再起動時だけ）
    ///
    /// トポロジカル順に見るので、SKIPPED は一度の走査で推移的に広がる。
    fn reconcile(&mut self, now: DateTime<Utc>) {
        let chain = Arc::clone(&self.chain);
        let fail_fast = chain.policy().failure_policy == FailurePolicy::FailFast;

        for &index in chain.topological_order() {
            let outcome = match self.runs[index].state {
                JobState::Pending => {
                    match scheduler::blocking_prerequisite(&chain, &self.runs, index) {
                        Some(blocker) if fail_fast => {
                            let origin = self.failure_origin(blocker);
                            self.skip(index, origin, now)
                        }
                        _ if scheduler::prerequisites_satisfied(&chain, &self.runs, index) => {
                            self.push_ready(index)
                        }
                        _ => Ok(()),
                    }
                }
                JobState::RetryPending => self.push_ready(index),
                _ => Ok(()),
            };
            if let Err(e) = outcome {
                warn!(chain_id = %self.chain_id, error = %e, "reconcile skipped an illegal transition");
            }
        }
        self.refresh_status(now);
    }

    /// SKIPPED ジョブなら、その原因になった最初の失敗ジョブを辿る
    fn failure_origin(&self, blocker: usize) -> JobId {
        match &self.runs[blocker].last_failure {
            Some(FailureReason::UpstreamFailed { job }) if self.runs[blocker].state == JobState::Skipped => {
                job.clone()
            }
            _ => self.runs[blocker].job_id.clone(),
        }
    }

    fn skip(&mut self, index: usize, origin: JobId, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.apply(index, |run| run.mark_skipped(origin.clone()))?;
        self.runs[index].decisions.push(DecisionRecord::new(
            serde_json::json!({ "upstream_failed": origin }),
            "fail_fast",
            "skip",
            None,
            now,
        ));
        debug!(chain_id = %self.chain_id, job = %self.runs[index].job_id, upstream = %origin, "job skipped");
        Ok(())
    }

    /// backoff が明けた RETRY_PENDING を READY に戻す
    pub(crate) fn promote_due_retries(&mut self, now: Instant) -> usize {
        let mut promoted = 0;
        while let Some(entry) = self.scheduled.peek() {
            if entry.at > now {
                break; // Heap is sorted, so we can stop
            }
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            if self.runs[entry.index].state != JobState::RetryPending {
                continue;
            }
            match self.push_ready(entry.index) {
                Ok(()) => promoted += 1,
                Err(e) => warn!(chain_id = %self.chain_id, error = %e, "retry promotion rejected"),
            }
        }
        if promoted > 0 {
            self.revision += 1;
        }
        promoted
    }

    /// READY のジョブを 1 つ排他的に RUNNING にする
    pub(crate) fn claim(&mut self, attempt_id: AttemptId, now: DateTime<Utc>) -> Option<Claim> {
        while let Some(index) = self.ready.pop_front() {
            if self.runs[index].state != JobState::Ready {
                continue;
            }
            let attempt = match self.apply(index, |run| run.start_attempt(attempt_id, now)) {
                Ok(attempt) => attempt,
                Err(e) => {
                    warn!(chain_id = %self.chain_id, error = %e, "claim rejected");
                    continue;
                }
            };
            self.revision += 1;

            let upstream = self
                .chain
                .prerequisites_of(index)
                .iter()
                .filter_map(|&p| {
                    let run = &self.runs[p];
                    run.artifact.clone().map(|a| (run.job_id.clone(), a))
                })
                .collect();

            debug!(
                chain_id = %self.chain_id,
                job = %self.runs[index].job_id,
                attempt,
                %attempt_id,
                "job claimed"
            );
            return Some(Claim {
                index,
                attempt,
                attempt_id,
                upstream,
            });
        }
        None
    }

    /// worker からの結果報告。チェーンが終端に達した瞬間だけ `true` を返す。
    pub(crate) fn complete(
        &mut self,
        index: usize,
        attempt: u32,
        result: std::result::Result<JobOutput, ExecutionError>,
        decider: &dyn Decider,
        now: DateTime<Utc>,
        instant_now: Instant,
    ) -> Result<bool> {
        let run = &self.runs[index];
        if run.state != JobState::Running || run.attempts != attempt {
            warn!(
                chain_id = %self.chain_id,
                job = %run.job_id,
                attempt,
                state = %run.state,
                "ignoring stale report"
            );
            return Ok(false);
        }

        let outcome = OutcomeKind::of(&result);
        match result {
            Ok(output) => self.on_success(index, output, now)?,
            Err(err) if self.cancelled || matches!(err, ExecutionError::Cancelled(_)) => {
                self.apply(index, |run| run.mark_cancelled(now))?;
                info!(chain_id = %self.chain_id, job = %self.runs[index].job_id, attempt, "job cancelled");
            }
            Err(err) => self.on_failure(index, outcome, err, decider, now, instant_now)?,
        }

        self.revision += 1;
        Ok(self.refresh_status(now))
    }

    fn on_success(&mut self, index: usize, output: JobOutput, now: DateTime<Utc>) -> Result<()> {
        self.apply(index, |run| run.mark_succeeded(output, now))?;
        info!(
            chain_id = %self.chain_id,
            job = %self.runs[index].job_id,
            attempt = self.runs[index].attempts,
            state = %JobState::Succeeded,
            "job succeeded"
        );

        // キャンセル後に遅れて成功した場合、後続はすでに CANCELLED
        if self.cancelled {
            return Ok(());
        }
        let chain = Arc::clone(&self.chain);
        for dependent in scheduler::newly_ready(&chain, &self.runs, index) {
            self.push_ready(dependent)?;
        }
        Ok(())
    }

    fn on_failure(
        &mut self,
        index: usize,
        outcome: OutcomeKind,
        err: ExecutionError,
        decider: &dyn Decider,
        now: DateTime<Utc>,
        instant_now: Instant,
    ) -> Result<()> {
        let chain = Arc::clone(&self.chain);
        let spec = chain.job(index);
        let backoff = spec.backoff.as_ref().unwrap_or(&chain.policy().backoff);
        let reason = FailureReason::from(&err);
        let decision = decider.decide(&self.runs[index], &err, backoff);
        let trigger = serde_json::json!({
            "attempt": self.runs[index].attempts,
            "error": err.to_string(),
        });

        match decision {
            Decision::Retry { delay, reason: why } => {
                let eligible_at = chrono::Duration::from_std(delay)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d))
                    .unwrap_or(now);
                self.apply(index, |run| {
                    run.schedule_retry(outcome, reason, eligible_at, now)
                })?;
                self.scheduled.push(ScheduledRetry {
                    at: instant_now + delay,
                    index,
                });
                self.record_decision(index, trigger, "schedule_retry", &why, delay, now);
                warn!(
                    chain_id = %self.chain_id,
                    job = %spec.id,
                    attempt = self.runs[index].attempts,
                    error = %err,
                    delay_ms = millis::saturating_millis(delay),
                    "attempt failed, retry scheduled"
                );
            }
            Decision::MarkFailed { reason: why } => {
                self.apply(index, |run| run.mark_failed(outcome, reason, now))?;
                self.record_decision(index, trigger, "mark_failed", &why, Duration::ZERO, now);
                warn!(
                    chain_id = %self.chain_id,
                    job = %spec.id,
                    attempt = self.runs[index].attempts,
                    error = %err,
                    state = %JobState::Failed,
                    "job failed permanently"
                );
                if chain.policy().failure_policy == FailurePolicy::FailFast {
                    self.propagate_failure(index, now)?;
                }
            }
        }
        Ok(())
    }

    fn record_decision(
        &mut self,
        index: usize,
        trigger: serde_json::Value,
        decision: &str,
        why: &str,
        delay: Duration,
        now: DateTime<Utc>,
    ) {
        self.runs[index].decisions.push(DecisionRecord::new(
            trigger,
            "retry_policy",
            decision,
            Some(serde_json::json!({ "reason": why, "delay_ms": millis::saturating_millis(delay) })),
            now,
        ));
    }

    /// fail-fast: 失敗したジョブの推移的後続をすべて SKIPPED にする
    fn propagate_failure(&mut self, failed: usize, now: DateTime<Utc>) -> Result<()> {
        let chain = Arc::clone(&self.chain);
        let origin = self.runs[failed].job_id.clone();
        let targets = scheduler::skip_targets(&chain, &self.runs, failed);
        let mut skipped = 0usize;
        for target in targets {
            if self.runs[target].state == JobState::Pending {
                self.skip(target, origin.clone(), now)?;
                skipped += 1;
            }
        }
        if skipped > 0 {
            info!(chain_id = %self.chain_id, upstream = %origin, skipped, "fail-fast skipped dependents");
        }
        Ok(())
    }

    /// キャンセル。すでに終端なら何もしない（`false`）。
    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.cancelled = true;
        self.cancel_waiting(now);
        self.status = ChainStatus::Cancelled;
        self.finished_at = Some(now);
        self.revision += 1;
        info!(
            chain_id = %self.chain_id,
            running = self.counts.running,
            "chain cancelled"
        );
        true
    }

    /// RUNNING 以外の非終端ジョブを CANCELLED にし、待ち行列を空にする
    fn cancel_waiting(&mut self, now: DateTime<Utc>) {
        for index in 0..self.runs.len() {
            let state = self.runs[index].state;
            if state.is_terminal() || state == JobState::Running {
                continue;
            }
            if let Err(e) = self.apply(index, |run| run.mark_cancelled(now)) {
                warn!(chain_id = %self.chain_id, error = %e, "cancel rejected");
            }
        }
        self.ready.clear();
        self.scheduled.clear();
    }

    /// 終端に達した瞬間だけ `true`
    fn refresh_status(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let next = supervisor::evaluate(
            &self.counts,
            self.chain.policy().failure_policy,
            self.cancelled,
        );
        if !next.is_terminal() {
            return false;
        }
        self.status = next;
        self.finished_at = Some(now);
        info!(
            chain_id = %self.chain_id,
            status = %next,
            succeeded = self.counts.succeeded,
            failed = self.counts.failed,
            skipped = self.counts.skipped,
            "chain finished"
        );
        true
    }

    #[cfg(test)]
    fn state_of(&self, job: &str) -> JobState {
        let index = self.chain.index_of(job).expect("known job");
        self.runs[index].state
    }
}
