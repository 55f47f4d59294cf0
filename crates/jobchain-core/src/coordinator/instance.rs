//! ChainInstance: 1 回の実行の共有ハンドル
//!
//! worker 群と dispatcher が `Arc` で共有する。可変状態は `ChainState` だけで、
//! チェーンごとに 1 つの Mutex で守る。handler の実行中はロックを握らない。

use std::sync::Arc;

use tokio::sync::{Mutex, Notify, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::error;

use super::Collaborators;
use super::lease::JobLease;
use super::state::ChainState;
use crate::domain::{ChainId, ChainSnapshot, ChainStatus, ExecutionError, JobOutput};
use crate::graph::JobChain;
use crate::runtime::JobContext;
use crate::supervisor::CompletionSignal;

/// wait_for_work の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkState {
    /// READY のジョブがある（claim は競争なので取れるとは限らない）
    Available,
    /// チェーンが終端に達した。worker は抜けてよい
    Finished,
}

pub struct ChainInstance {
    chain_id: ChainId,
    chain: Arc<JobChain>,
    state: Mutex<ChainState>,
    notify: Notify,
    cancel: CancellationToken,
    completion: watch::Sender<Option<ChainSnapshot>>,
    collab: Collaborators,
}

impl ChainInstance {
    pub(crate) fn new(
        chain: Arc<JobChain>,
        state: ChainState,
        collab: Collaborators,
    ) -> Arc<Self> {
        let snapshot = state.snapshot();
        // 再開したチェーンがすでに終端なら、完了通知は最初から発火済み
        let initial = snapshot.status.is_terminal().then(|| snapshot.clone());
        let (completion, _) = watch::channel(initial);
        let cancel = CancellationToken::new();
        if snapshot.status == ChainStatus::Cancelled {
            cancel.cancel();
        }

        Arc::new(Self {
            chain_id: snapshot.chain_id,
            chain,
            state: Mutex::new(state),
            notify: Notify::new(),
            cancel,
            completion,
            collab,
        })
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn chain(&self) -> &JobChain {
        &self.chain
    }

    pub async fn snapshot(&self) -> ChainSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn status(&self) -> ChainStatus {
        self.state.lock().await.status()
    }

    /// 終端に達していて、実行中の試行も残っていない
    pub(crate) async fn is_settled(&self) -> bool {
        let state = self.state.lock().await;
        state.status().is_terminal() && state.in_flight() == 0
    }

    pub fn completion(&self) -> CompletionSignal {
        CompletionSignal::new(self.chain_id, self.completion.subscribe())
    }

    /// READY のジョブが現れるか、チェーンが終わるまで待つ
    ///
    /// 起こすのは状態変化の通知と、最も早い retry timer だけ（polling しない）。
    pub(crate) async fn wait_for_work(&self) -> WorkState {
        loop {
            // ロックを取る前に登録しておき、確認と待機の間の通知を取りこぼさない
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_retry = {
                let mut state = self.state.lock().await;
                state.promote_due_retries(Instant::now());
                if state.status().is_terminal() {
                    return WorkState::Finished;
                }
                if state.has_ready() {
                    return WorkState::Available;
                }
                state.next_retry_at()
            };

            match next_retry {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// READY のジョブを 1 つ排他的に claim する
    pub(crate) async fn try_claim(self: &Arc<Self>) -> Option<JobLease> {
        let claim = {
            let mut state = self.state.lock().await;
            state.promote_due_retries(Instant::now());
            if !state.has_ready() {
                return None;
            }
            state.claim(self.collab.ids.generate_attempt_id(), self.collab.clock.now())?
        };

        let spec = self.chain.job(claim.index);
        let context = JobContext {
            chain_id: self.chain_id,
            job_id: spec.id.clone(),
            attempt_id: claim.attempt_id,
            attempt: claim.attempt,
            handler: spec.handler.clone(),
            payload: spec.payload.clone(),
            upstream: claim.upstream,
            timeout: spec.timeout,
            cancellation: self.cancel.child_token(),
        };
        Some(JobLease::new(Arc::clone(self), claim.index, context))
    }

    /// 試行結果を反映し、保存用の snapshot を返す
    pub(crate) async fn report(
        &self,
        index: usize,
        attempt: u32,
        result: Result<JobOutput, ExecutionError>,
    ) -> ChainSnapshot {
        let (snapshot, finished) = {
            let mut state = self.state.lock().await;
            let finished = match state.complete(
                index,
                attempt,
                result,
                self.collab.decider.as_ref(),
                self.collab.clock.now(),
                Instant::now(),
            ) {
                Ok(finished) => finished,
                Err(e) => {
                    error!(chain_id = %self.chain_id, error = %e, "failed to apply job outcome");
                    false
                }
            };
            (state.snapshot(), finished)
        };

        if finished {
            self.completion.send_replace(Some(snapshot.clone()));
        }
        // Notify outside the lock
        self.notify.notify_waiters();
        snapshot
    }

    /// キャンセル。すでに終端なら `None`（冪等）
    pub async fn cancel(&self) -> Option<ChainSnapshot> {
        let snapshot = {
            let mut state = self.state.lock().await;
            if !state.cancel(self.collab.clock.now()) {
                return None;
            }
            state.snapshot()
        };

        // 実行中の handler には token で知らせるだけで、終了は待たない
        self.cancel.cancel();
        self.completion.send_replace(Some(snapshot.clone()));
        self.notify.notify_waiters();
        Some(snapshot)
    }
}
