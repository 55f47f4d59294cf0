//! State - ジョブとチェーンの状態
//!
//! # ジョブの状態遷移
//! ```text
//! PENDING ──> READY ──> RUNNING ──> SUCCEEDED
//!    │          │          ├──────> RETRY_PENDING ──> READY
//!    │          │          ├──────> FAILED
//!    │          │          └──────> CANCELLED   (キャンセル後の遅延失敗)
//!    ├──> SKIPPED (fail-fast で上流が失敗)
//!    └──> CANCELLED <── READY / RETRY_PENDING
//! ```
//! RUNNING からの遷移だけが worker の報告で起きる。それ以外は coordinator が決める。

use serde::{Deserialize, Serialize};
use std::fmt;

/// JobState は 1 ジョブの実行状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// 前提ジョブ待ち
    Pending,
    /// 実行可能（ready queue にいる）
    Ready,
    /// 実行中（claim 済み）
    Running,
    /// backoff 待ち
    RetryPending,
    Succeeded,
    Failed,
    /// 上流の失敗により実行されない
    Skipped,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Skipped | JobState::Cancelled
        )
    }

    /// 後続をブロックする終端状態（fail-fast の伝播元）
    pub fn is_blocking(self) -> bool {
        matches!(self, JobState::Failed | JobState::Skipped)
    }

    /// まだ進捗しうる状態（チェーンを RUNNING に保つ）
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobState::Ready | JobState::Running | JobState::RetryPending
        )
    }

    /// 許可された遷移かどうか
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Pending, Cancelled)
                | (Ready, Running)
                | (Ready, Cancelled)
                | (Running, Succeeded)
                | (Running, RetryPending)
                | (Running, Failed)
                | (Running, Cancelled)
                | (RetryPending, Ready)
                | (RetryPending, Cancelled)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "PENDING",
            JobState::Ready => "READY",
            JobState::Running => "RUNNING",
            JobState::RetryPending => "RETRY_PENDING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
            JobState::Skipped => "SKIPPED",
            JobState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// ChainStatus はチェーン全体の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainStatus {
    Running,
    Succeeded,
    Failed,
    PartiallyFailed,
    Cancelled,
}

impl ChainStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ChainStatus::Running)
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChainStatus::Running => "RUNNING",
            ChainStatus::Succeeded => "SUCCEEDED",
            ChainStatus::Failed => "FAILED",
            ChainStatus::PartiallyFailed => "PARTIALLY_FAILED",
            ChainStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}
