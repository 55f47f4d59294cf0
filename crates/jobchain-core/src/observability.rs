//! Observability: 状態の集計と tracing の初期化
//!
//! ログレベルの優先順位:
//! 1. 引数で渡されたレベル（CLI の `--log-level`）
//! 2. `JOBCHAIN_LOG` 環境変数
//! 3. `RUST_LOG` 環境変数
//! 4. `info`

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::domain::JobState;
use crate::error::{DispatchError, Result};

pub const LOG_ENV: &str = "JOBCHAIN_LOG";

/// ジョブ状態ごとの件数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub retry_pending: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl StateCounts {
    pub fn from_states(states: impl IntoIterator<Item = JobState>) -> Self {
        let mut counts = Self::default();
        for state in states {
            *counts.slot(state) += 1;
        }
        counts
    }

    fn slot(&mut self, state: JobState) -> &mut usize {
        match state {
            JobState::Pending => &mut self.pending,
            JobState::Ready => &mut self.ready,
            JobState::Running => &mut self.running,
            JobState::RetryPending => &mut self.retry_pending,
            JobState::Succeeded => &mut self.succeeded,
            JobState::Failed => &mut self.failed,
            JobState::Skipped => &mut self.skipped,
            JobState::Cancelled => &mut self.cancelled,
        }
    }

    /// 1 ジョブの遷移を反映する
    pub fn moved(&mut self, from: JobState, to: JobState) {
        if from != to {
            *self.slot(from) -= 1;
            *self.slot(to) += 1;
        }
    }

    /// READY / RUNNING / RETRY_PENDING の合計
    pub fn active(&self) -> usize {
        self.ready + self.running + self.retry_pending
    }

    pub fn total(&self) -> usize {
        self.pending
            + self.active()
            + self.succeeded
            + self.failed
            + self.skipped
            + self.cancelled
    }
}

/// Install the global fmt subscriber (stderr).
///
/// 二度目の呼び出しはエラーを返す。
pub fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .map_err(|e| DispatchError::Config(format!("invalid log level `{level}`: {e}")))?,
        None => EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .map_err(|e| DispatchError::Config(format!("tracing already initialised: {e}")))
}
