mod common;

use std::sync::Arc;

use jobchain_core::domain::{ChainStatus, FailurePolicy, FailureReason, JobSpec, JobState, OutcomeKind};
use jobchain_core::impls::InMemoryRunStore;
use jobchain_core::ports::RunStore;
use jobchain_core::{DispatchError, DispatcherBuilder, ShutdownMode};

use common::{Echo, Hang, init_tracing, policy};

fn jobs() -> Vec<JobSpec> {
    vec![
        JobSpec::new("prepare", "echo"),
        JobSpec::new("render", "render").after(["prepare"]).with_retries(1),
        JobSpec::new("publish", "echo").after(["render"]),
    ]
}

#[tokio::test]
async fn interrupted_job_gets_a_fresh_attempt_after_restart() {
    init_tracing();
    let store = Arc::new(InMemoryRunStore::new());
    let started = Arc::new(tokio::sync::Notify::new());

    // first process: render hangs and the dispatcher is suspended mid-attempt
    let first = DispatcherBuilder::default()
        .register("echo", Arc::new(Echo))
        .unwrap()
        .register("render", Arc::new(Hang { started: Arc::clone(&started) }))
        .unwrap()
        .with_store(store.clone())
        .build()
        .unwrap();
    let chain_id = first
        .submit_chain(jobs(), policy(2, FailurePolicy::FailFast))
        .await
        .unwrap()
        .chain_id;

    started.notified().await;
    let suspended = first.shutdown(ShutdownMode::Suspend).await.unwrap();
    assert_eq!(suspended.len(), 1);
    assert_eq!(suspended[0].status, ChainStatus::Running);
    assert_eq!(suspended[0].state_of("prepare"), Some(JobState::Succeeded));
    assert_eq!(suspended[0].state_of("render"), Some(JobState::Running));

    let unfinished = store.unfinished().await.unwrap();
    assert_eq!(unfinished.len(), 1);
    let persisted = unfinished.into_iter().next().unwrap();
    assert_eq!(persisted.chain_id, chain_id);

    // second process: render works now
    let second = DispatcherBuilder::default()
        .register("echo", Arc::new(Echo))
        .unwrap()
        .register("render", Arc::new(Echo))
        .unwrap()
        .with_store(store.clone())
        .build()
        .unwrap();
    let resumed = second
        .resume(jobs(), policy(2, FailurePolicy::FailFast), persisted.clone())
        .await
        .unwrap();
    assert_eq!(resumed.chain_id, chain_id);
    assert!(resumed.revision > persisted.revision);

    let done = second.completion(chain_id).await.unwrap().wait().await.unwrap();
    assert_eq!(done.status, ChainStatus::Succeeded);

    let prepare = done.job("prepare").unwrap();
    assert_eq!(prepare.attempts, 1, "succeeded jobs are not re-run");

    let render = done.job("render").unwrap();
    assert_eq!(render.attempts, 2, "the interrupted attempt counts once");
    assert_eq!(render.history[0].outcome, Some(OutcomeKind::Interrupted));
    assert_eq!(render.history[1].outcome, Some(OutcomeKind::Success));
    assert!(render.decisions.iter().any(|d| d.policy == "restart_recovery"));

    // a second resume of the same chain is refused while it is registered
    let again = second
        .resume(jobs(), policy(2, FailurePolicy::FailFast), persisted)
        .await;
    assert!(matches!(again, Err(DispatchError::ChainAlreadyActive(id)) if id == chain_id));
}

#[tokio::test]
async fn interrupted_job_without_budget_fails_on_restart() {
    init_tracing();
    let store = Arc::new(InMemoryRunStore::new());
    let started = Arc::new(tokio::sync::Notify::new());
    let jobs = || {
        vec![
            JobSpec::new("only", "render"),
            JobSpec::new("after", "echo").after(["only"]),
        ]
    };

    let first = DispatcherBuilder::default()
        .register("echo", Arc::new(Echo))
        .unwrap()
        .register("render", Arc::new(Hang { started: Arc::clone(&started) }))
        .unwrap()
        .with_store(store.clone())
        .build()
        .unwrap();
    first
        .submit_chain(jobs(), policy(1, FailurePolicy::FailFast))
        .await
        .unwrap();
    started.notified().await;
    let persisted = first
        .shutdown(ShutdownMode::Suspend)
        .await
        .unwrap()
        .remove(0);

    let second = DispatcherBuilder::default()
        .register("echo", Arc::new(Echo))
        .unwrap()
        .register("render", Arc::new(Echo))
        .unwrap()
        .with_store(store)
        .build()
        .unwrap();
    let resumed = second
        .resume(jobs(), policy(1, FailurePolicy::FailFast), persisted)
        .await
        .unwrap();

    assert_eq!(resumed.status, ChainStatus::Failed);
    assert_eq!(
        resumed.job("only").unwrap().last_failure,
        Some(FailureReason::Interrupted)
    );
    assert_eq!(resumed.state_of("after"), Some(JobState::Skipped));
    let done = second
        .completion(resumed.chain_id)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(done.status, ChainStatus::Failed);
}

#[tokio::test]
async fn resume_rejects_a_snapshot_of_another_chain() {
    init_tracing();
    let dispatcher = DispatcherBuilder::default()
        .register("echo", Arc::new(Echo))
        .unwrap()
        .build()
        .unwrap();
    let snapshot = dispatcher
        .submit_chain(
            vec![JobSpec::new("a", "echo")],
            policy(1, FailurePolicy::FailFast),
        )
        .await
        .unwrap();
    let other = DispatcherBuilder::default()
        .register("echo", Arc::new(Echo))
        .unwrap()
        .build()
        .unwrap();

    let result = other
        .resume(
            vec![JobSpec::new("b", "echo")],
            policy(1, FailurePolicy::FailFast),
            snapshot,
        )
        .await;
    assert!(matches!(result, Err(DispatchError::SnapshotMismatch(_))));
}

#[tokio::test]
async fn settled_chain_can_be_resumed_before_it_is_evicted() {
    init_tracing();
    let dispatcher = DispatcherBuilder::default()
        .register("echo", Arc::new(Echo))
        .unwrap()
        .build()
        .unwrap();
    let jobs = || vec![JobSpec::new("a", "echo")];

    let chain_id = dispatcher
        .submit_chain(jobs(), policy(1, FailurePolicy::FailFast))
        .await
        .unwrap()
        .chain_id;
    let done = dispatcher
        .completion(chain_id)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    // still registered until resume sweeps it; the sweep needs the worker to have exited
    let resumed = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            match dispatcher
                .resume(jobs(), policy(1, FailurePolicy::FailFast), done.clone())
                .await
            {
                Err(DispatchError::ChainAlreadyActive(_)) => tokio::task::yield_now().await,
                other => break other,
            }
        }
    })
    .await
    .expect("settled chain was never released")
    .unwrap();

    assert_eq!(resumed.status, ChainStatus::Succeeded);
    assert_eq!(resumed.job("a").unwrap().attempts, 1);
}
