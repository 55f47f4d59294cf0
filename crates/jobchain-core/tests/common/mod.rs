#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use jobchain_core::coordinator::RetryPolicy;
use jobchain_core::domain::{ChainPolicy, ExecutionError, FailurePolicy, JobOutput};
use jobchain_core::runtime::{JobContext, JobHandler};
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// Logs go through `with_test_writer()`, so they only show up for failing tests
/// (or with `-- --nocapture`). `RUST_LOG=debug cargo test` for more.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

pub fn policy(max_concurrency: usize, failure_policy: FailurePolicy) -> ChainPolicy {
    ChainPolicy::new(
        max_concurrency,
        failure_policy,
        RetryPolicy::new(Duration::from_millis(100), 2.0, Duration::from_secs(1)),
    )
}

/// Succeeds and echoes its payload as the artifact.
pub struct Echo;

#[async_trait]
impl JobHandler for Echo {
    async fn execute(&self, ctx: JobContext) -> Result<JobOutput, ExecutionError> {
        Ok(JobOutput::with_artifact(ctx.payload))
    }
}

/// Always fails.
pub struct Fail;

#[async_trait]
impl JobHandler for Fail {
    async fn execute(&self, ctx: JobContext) -> Result<JobOutput, ExecutionError> {
        Err(ExecutionError::handler(format!("{} is broken", ctx.job_id)))
    }
}

/// Fails the first `failures` attempts of every job, then succeeds.
pub struct Flaky {
    failures: u32,
}

impl Flaky {
    pub fn new(failures: u32) -> Self {
        Self { failures }
    }
}

#[async_trait]
impl JobHandler for Flaky {
    async fn execute(&self, ctx: JobContext) -> Result<JobOutput, ExecutionError> {
        if ctx.attempt <= self.failures {
            return Err(ExecutionError::handler(format!("attempt {} failed", ctx.attempt)));
        }
        Ok(JobOutput::empty())
    }
}

/// Sleeps `payload.ms` and records how many jobs were inside `execute` at once.
#[derive(Default)]
pub struct Tracking {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    per_job: Mutex<HashMap<String, usize>>,
    max_per_job: AtomicUsize,
    calls: AtomicUsize,
}

impl Tracking {
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn max_per_job(&self) -> usize {
        self.max_per_job.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self, job: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let mut per_job = self.per_job.lock().unwrap();
        let count = per_job.entry(job.to_string()).or_default();
        *count += 1;
        self.max_per_job.fetch_max(*count, Ordering::SeqCst);
    }

    fn leave(&self, job: &str) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self.per_job.lock().unwrap().get_mut(job) {
            *count -= 1;
        }
    }
}

#[async_trait]
impl JobHandler for Tracking {
    async fn execute(&self, ctx: JobContext) -> Result<JobOutput, ExecutionError> {
        let ms = ctx.payload.get("ms").and_then(|v| v.as_u64()).unwrap_or(10);
        self.enter(ctx.job_id.as_str());
        tokio::time::sleep(Duration::from_millis(ms)).await;
        self.leave(ctx.job_id.as_str());
        Ok(JobOutput::empty())
    }
}

/// Waits until the job is cancelled (or the task is aborted).
pub struct Hang {
    pub started: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl JobHandler for Hang {
    async fn execute(&self, ctx: JobContext) -> Result<JobOutput, ExecutionError> {
        self.started.notify_one();
        ctx.cancellation.cancelled().await;
        Err(jobchain_core::domain::CancellationError.into())
    }
}
