//! Frontier: 「いま走らせてよいジョブ」の計算
//!
//! `runs` は常に `JobChain` の宣言順インデックスと揃っている前提。

use std::collections::BTreeSet;

use crate::domain::{JobId, JobRun, JobState};
use crate::graph::JobChain;

/// 前提がすべて SUCCEEDED か
pub fn prerequisites_satisfied(chain: &JobChain, runs: &[JobRun], index: usize) -> bool {
    chain
        .prerequisites_of(index)
        .iter()
        .all(|&p| runs[p].state == JobState::Succeeded)
}

/// 前提のうち最初にブロックしているもの（FAILED / SKIPPED）
pub fn blocking_prerequisite(chain: &JobChain, runs: &[JobRun], index: usize) -> Option<usize> {
    chain
        .prerequisites_of(index)
        .iter()
        .copied()
        .find(|&p| runs[p].state.is_blocking())
}

/// Pure frontier: PENDING / RETRY_PENDING かつ前提がすべて SUCCEEDED のジョブ
///
/// 全体を走査するので、診断と再起動時の照合にだけ使う。
pub fn frontier(chain: &JobChain, runs: &[JobRun]) -> BTreeSet<JobId> {
    (0..chain.len())
        .filter(|&i| matches!(runs[i].state, JobState::Pending | JobState::RetryPending))
        .filter(|&i| prerequisites_satisfied(chain, runs, i))
        .map(|i| chain.job(i).id.clone())
        .collect()
}

/// `succeeded` が成功した直後に READY にできる直接の後続
///
/// PENDING のものだけを返すので、重複した再計算でも二度昇格しない。
pub fn newly_ready(chain: &JobChain, runs: &[JobRun], succeeded: usize) -> Vec<usize> {
    chain
        .dependents_of(succeeded)
        .iter()
        .copied()
        .filter(|&d| runs[d].state == JobState::Pending)
        .filter(|&d| prerequisites_satisfied(chain, runs, d))
        .collect()
}

/// fail-fast で SKIPPED にすべき推移的後続（終端でないもの）。発見順。
pub fn skip_targets(chain: &JobChain, runs: &[JobRun], failed: usize) -> Vec<usize> {
    let mut visited = vec![false; chain.len()];
    let mut stack = vec![failed];
    let mut targets = Vec::new();
    visited[failed] = true;

    while let Some(node) = stack.pop() {
        for &dependent in chain.dependents_of(node) {
            if visited[dependent] {
                continue;
            }
            visited[dependent] = true;
            if !runs[dependent].state.is_terminal() {
                targets.push(dependent);
            }
            stack.push(dependent);
        }
    }
    targets
}
