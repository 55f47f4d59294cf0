//! ChainSnapshot: get_status と永続化の単位

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::ChainId;
use super::run::JobRun;
use super::spec::FailurePolicy;
use super::state::{ChainStatus, JobState};
use crate::observability::StateCounts;

/// チェーン 1 インスタンスの観測可能な状態のコピー
///
/// `revision` は状態が変わるたびに増える。永続化側は新しい revision だけを保存する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub chain_id: ChainId,
    pub status: ChainStatus,
    pub failure_policy: FailurePolicy,
    pub revision: u64,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 宣言順
    pub jobs: Vec<JobRun>,
}

impl ChainSnapshot {
    pub fn job(&self, job_id: &str) -> Option<&JobRun> {
        self.jobs.iter().find(|run| run.job_id.as_str() == job_id)
    }

    pub fn state_of(&self, job_id: &str) -> Option<JobState> {
        self.job(job_id).map(|run| run.state)
    }

    pub fn counts(&self) -> StateCounts {
        StateCounts::from_states(self.jobs.iter().map(|run| run.state))
    }
}
