use std::collections::{BTreeSet, HashMap};

use jobchain_core::coordinator::RetryPolicy;
use jobchain_core::domain::{ChainPolicy, FailurePolicy, GraphError, JobRun, JobSpec, JobState};
use jobchain_core::graph::JobChain;
use jobchain_core::scheduler;
use proptest::prelude::*;

fn chain_policy() -> ChainPolicy {
    ChainPolicy::new(2, FailurePolicy::FailFast, RetryPolicy::immediate())
}

// Job i may only depend on jobs 0..i, so every generated set is acyclic.
fn dag_strategy(max_jobs: usize) -> impl Strategy<Value = Vec<JobSpec>> {
    (1..=max_jobs).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..4), n).prop_map(
            |raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(i, picks)| {
                        let deps: BTreeSet<usize> = if i == 0 {
                            BTreeSet::new()
                        } else {
                            picks.into_iter().map(|p| p % i).collect()
                        };
                        JobSpec::new(format!("job-{i}"), "noop")
                            .after(deps.into_iter().map(|d| format!("job-{d}")))
                    })
                    .collect()
            },
        )
    })
}

fn state_strategy() -> impl Strategy<Value = JobState> {
    prop_oneof![
        Just(JobState::Pending),
        Just(JobState::Ready),
        Just(JobState::Running),
        Just(JobState::Succeeded),
        Just(JobState::Failed),
        Just(JobState::RetryPending),
        Just(JobState::Skipped),
        Just(JobState::Cancelled),
    ]
}

proptest! {
    #[test]
    fn topological_order_respects_every_edge(specs in dag_strategy(12)) {
        let chain = JobChain::build(specs, chain_policy()).unwrap();
        let position: HashMap<usize, usize> = chain
            .topological_order()
            .iter()
            .enumerate()
            .map(|(pos, &index)| (index, pos))
            .collect();

        prop_assert_eq!(position.len(), chain.len());
        for index in 0..chain.len() {
            for &prerequisite in chain.prerequisites_of(index) {
                prop_assert!(position[&prerequisite] < position[&index]);
            }
        }
    }

    #[test]
    fn frontier_only_holds_jobs_with_succeeded_prerequisites(
        (specs, states) in dag_strategy(12).prop_flat_map(|specs| {
            let n = specs.len();
            (Just(specs), proptest::collection::vec(state_strategy(), n))
        })
    ) {
        let chain = JobChain::build(specs, chain_policy()).unwrap();
        let runs: Vec<JobRun> = chain
            .jobs()
            .iter()
            .zip(states)
            .map(|(spec, state)| {
                let mut run = JobRun::new(spec);
                run.state = state;
                run
            })
            .collect();

        for id in scheduler::frontier(&chain, &runs) {
            let index = chain.index_of(id.as_str()).unwrap();
            for &prerequisite in chain.prerequisites_of(index) {
                prop_assert_eq!(runs[prerequisite].state, JobState::Succeeded);
            }
        }
    }

    #[test]
    fn closing_a_path_into_a_loop_is_rejected(len in 2usize..10) {
        // job-0 <- job-1 <- ... <- job-(len-1), plus job-0 depending on the last one
        let specs: Vec<JobSpec> = (0..len)
            .map(|i| {
                let prerequisite = if i == 0 { len - 1 } else { i - 1 };
                JobSpec::new(format!("job-{i}"), "noop").after([format!("job-{prerequisite}")])
            })
            .collect();

        match JobChain::build(specs, chain_policy()) {
            Err(GraphError::CycleDetected { members }) => prop_assert_eq!(members.len(), len),
            other => prop_assert!(false, "expected a cycle, got {:?}", other.map(|c| c.len())),
        }
    }
}
