//! Chain supervisor: チェーン全体の状態と完了通知
//!
//! ```text
//! CANCELLED          キャンセルが自然完了より先（以後変わらない）
//! RUNNING            READY / RUNNING / RETRY_PENDING のジョブがある
//! SUCCEEDED          全ジョブ SUCCEEDED
//! FAILED             それ以外で fail-fast
//! PARTIALLY_FAILED   それ以外で continue-on-failure
//! ```

use tokio::sync::watch;

use crate::domain::{ChainId, ChainSnapshot, ChainStatus, FailurePolicy};
use crate::error::{DispatchError, Result};
use crate::observability::StateCounts;

/// 状態の集計からチェーンの状態を決める
///
/// 前提がすべて成功した PENDING ジョブは同じ臨界区間で READY に昇格済みなので、
/// 「frontier が空でない」は「READY がある」に含まれる。
pub fn evaluate(counts: &StateCounts, policy: FailurePolicy, cancelled: bool) -> ChainStatus {
    if cancelled {
        return ChainStatus::Cancelled;
    }
    if counts.active() > 0 {
        return ChainStatus::Running;
    }
    if counts.succeeded == counts.total() {
        return ChainStatus::Succeeded;
    }
    match policy {
        FailurePolicy::FailFast => ChainStatus::Failed,
        FailurePolicy::ContinueOnFailure => ChainStatus::PartiallyFailed,
    }
}

/// 終端状態の snapshot を一度だけ受け取る
///
/// 発火後に作った signal も、保存済みの結果をすぐ返す。
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    chain_id: ChainId,
    rx: watch::Receiver<Option<ChainSnapshot>>,
}

impl CompletionSignal {
    pub(crate) fn new(chain_id: ChainId, rx: watch::Receiver<Option<ChainSnapshot>>) -> Self {
        Self { chain_id, rx }
    }

    /// 永続化済みの終端 snapshot から、発火済みの signal を作る
    pub(crate) fn resolved(snapshot: ChainSnapshot) -> Self {
        let chain_id = snapshot.chain_id;
        let (_tx, rx) = watch::channel(Some(snapshot));
        Self { chain_id, rx }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// 発火済みなら待たずに返す
    pub fn try_get(&self) -> Option<ChainSnapshot> {
        self.rx.borrow().clone()
    }

    pub async fn wait(mut self) -> Result<ChainSnapshot> {
        let chain_id = self.chain_id;
        let fired = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| DispatchError::Abandoned(chain_id))?;
        fired.clone().ok_or(DispatchError::Abandoned(chain_id))
    }
}
