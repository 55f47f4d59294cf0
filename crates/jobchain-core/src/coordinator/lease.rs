//! JobLease: claim した 1 試行の所有権
//!
//! 結果の報告は `complete(self)` で 1 回だけ（消費するので二重報告できない）。
//! 報告せずに drop した場合、ジョブは RUNNING のまま残り、再起動時に中断として扱われる。

use std::sync::Arc;

use super::instance::ChainInstance;
use crate::domain::{ChainSnapshot, ExecutionError, JobId, JobOutput};
use crate::runtime::JobContext;

pub struct JobLease {
    instance: Arc<ChainInstance>,
    index: usize,
    context: JobContext,
}

impl JobLease {
    pub(crate) fn new(instance: Arc<ChainInstance>, index: usize, context: JobContext) -> Self {
        Self {
            instance,
            index,
            context,
        }
    }

    pub fn context(&self) -> &JobContext {
        &self.context
    }

    pub fn job_id(&self) -> &JobId {
        &self.context.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.context.attempt
    }

    pub async fn complete(self, result: Result<JobOutput, ExecutionError>) -> ChainSnapshot {
        self.instance
            .report(self.index, self.context.attempt, result)
            .await
    }
}
