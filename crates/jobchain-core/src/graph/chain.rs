//! JobChain: 検証済みの不変 DAG

use std::collections::{HashMap, HashSet};

use super::dependency::DependencyGraph;
use crate::domain::{ChainPolicy, GraphError, JobId, JobSpec};

/// 検証済みのジョブチェーン
///
/// 構築後は変更しない。ジョブは宣言順のインデックスで参照する。
#[derive(Debug, Clone)]
pub struct JobChain {
    jobs: Vec<JobSpec>,
    index: HashMap<JobId, usize>,
    graph: DependencyGraph,
    topo_order: Vec<usize>,
    policy: ChainPolicy,
}

impl JobChain {
    /// JobSpec の集合を検証して JobChain を作る
    ///
    /// 検証順:
    /// 1. 空でないこと
    /// 2. ID が空白でなく、重複しないこと
    /// 3. 前提が存在し、同じ前提を二度書いていないこと
    /// 4. Kahn でトポロジカル順が取れること（取れなければ CycleDetected）
    pub fn build(jobs: Vec<JobSpec>, policy: ChainPolicy) -> Result<Self, GraphError> {
        if jobs.is_empty() {
            return Err(GraphError::EmptyChain);
        }

        let mut index = HashMap::with_capacity(jobs.len());
        for (i, spec) in jobs.iter().enumerate() {
            if spec.id.is_blank() {
                return Err(GraphError::BlankJobId);
            }
            if index.insert(spec.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateJobId(spec.id.clone()));
            }
        }

        let mut graph = DependencyGraph::with_nodes(jobs.len());
        for (i, spec) in jobs.iter().enumerate() {
            let mut seen = HashSet::with_capacity(spec.prerequisites.len());
            for dep in &spec.prerequisites {
                let Some(&dep_index) = index.get(dep) else {
                    return Err(GraphError::UnknownDependency {
                        job: spec.id.clone(),
                        dependency: dep.clone(),
                    });
                };
                if !seen.insert(dep_index) {
                    return Err(GraphError::DuplicateDependency {
                        job: spec.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                graph.add_dependency(i, dep_index);
            }
        }

        let topo_order = graph.topological_order().map_err(|cycle| GraphError::CycleDetected {
            members: cycle.into_iter().map(|i| jobs[i].id.clone()).collect(),
        })?;

        Ok(Self {
            jobs,
            index,
            graph,
            topo_order,
            policy,
        })
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// 宣言順
    pub fn jobs(&self) -> &[JobSpec] {
        &self.jobs
    }

    pub fn job(&self, index: usize) -> &JobSpec {
        &self.jobs[index]
    }

    pub fn index_of(&self, job_id: &str) -> Option<usize> {
        self.index.get(job_id).copied()
    }

    /// トポロジカル順のインデックス
    pub fn topological_order(&self) -> &[usize] {
        &self.topo_order
    }

    pub fn topological_ids(&self) -> impl Iterator<Item = &JobId> + '_ {
        self.topo_order.iter().map(|&i| &self.jobs[i].id)
    }

    pub fn prerequisites_of(&self, index: usize) -> &[usize] {
        self.graph.prerequisites_of(index)
    }

    pub fn dependents_of(&self, index: usize) -> &[usize] {
        self.graph.dependents_of(index)
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn policy(&self) -> &ChainPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::RetryPolicy;
    use crate::domain::FailurePolicy;

    fn policy() -> ChainPolicy {
        ChainPolicy::new(2, FailurePolicy::FailFast, RetryPolicy::immediate())
    }

    fn job(id: &str, deps: &[&str]) -> JobSpec {
        JobSpec::new(id, "noop").after(deps.iter().copied())
    }

    #[test]
    fn builds_diamond() {
        let chain = JobChain::build(
            vec![
                job("d", &["b", "c"]),
                job("b", &["a"]),
                job("c", &["a"]),
                job("a", &[]),
            ],
            policy(),
        )
        .unwrap();

        assert_eq!(chain.len(), 4);
        let a = chain.index_of("a").unwrap();
        let d = chain.index_of("d").unwrap();
        assert_eq!(chain.topological_order()[0], a);
        assert_eq!(*chain.topological_order().last().unwrap(), d);
        assert_eq!(chain.dependents_of(a).len(), 2);
        assert_eq!(chain.prerequisites_of(d).len(), 2);
        assert_eq!(chain.edge_count(), 4);
    }

    #[test]
    fn rejects_empty_chain() {
        assert_eq!(
            JobChain::build(vec![], policy()).unwrap_err(),
            GraphError::EmptyChain
        );
    }

    #[test]
    fn rejects_blank_id() {
        assert_eq!(
            JobChain::build(vec![job(" ", &[])], policy()).unwrap_err(),
            GraphError::BlankJobId
        );
    }

    #[test]
    fn rejects_duplicate_id() {
        let err = JobChain::build(vec![job("a", &[]), job("a", &[])], policy()).unwrap_err();
        assert_eq!(err, GraphError::DuplicateJobId(JobId::from("a")));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let err = JobChain::build(vec![job("a", &["ghost"])], policy()).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                job: JobId::from("a"),
                dependency: JobId::from("ghost"),
            }
        );
    }

    #[test]
    fn rejects_duplicate_dependency() {
        let err =
            JobChain::build(vec![job("a", &[]), job("b", &["a", "a"])], policy()).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateDependency { .. }));
    }

    #[test]
    fn rejects_cycle_with_members() {
        let err = JobChain::build(
            vec![job("a", &["c"]), job("b", &["a"]), job("c", &["b"]), job("x", &[])],
            policy(),
        )
        .unwrap_err();

        let GraphError::CycleDetected { mut members } = err else {
            panic!("expected cycle, got {err:?}");
        };
        members.sort();
        assert_eq!(members, vec![JobId::from("a"), JobId::from("b"), JobId::from("c")]);
    }

    #[test]
    fn self_dependency_is_reported_as_cycle() {
        let err = JobChain::build(vec![job("a", &["a"])], policy()).unwrap_err();
        assert_eq!(
            err,
            GraphError::CycleDetected {
                members: vec![JobId::from("a")]
            }
        );
    }
}
