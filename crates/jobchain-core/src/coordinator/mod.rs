//! Execution coordinator
//!
//! - state: JobRun arena, ready queue, backoff heap（純粋な状態遷移）
//! - instance: ロック・通知・キャンセルを持つ共有ハンドル
//! - lease: claim した 1 試行
//! - worker: チェーンごとの worker 群
//! - retry: backoff の計算

pub mod instance;
pub mod lease;
pub mod retry;
pub(crate) mod state;
pub mod worker;

use std::sync::Arc;

use crate::domain::Decider;
use crate::ports::{Clock, IdGenerator};

pub use self::instance::ChainInstance;
pub use self::lease::JobLease;
pub use self::retry::RetryPolicy;
pub use self::worker::{WorkerDeps, WorkerGroup};

/// coordinator が使う差し替え可能な協調先
#[derive(Clone)]
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub decider: Arc<dyn Decider>,
}
