use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::instance::{ChainInstance, WorkState};
use crate::domain::ExecutionError;
use crate::ports::RunStore;
use crate::runtime::Runtime;

/// Worker group handle for one chain instance.
/// - `request_shutdown()` で新しい claim を止め、実行中の handler も打ち切る
/// - チェーンが終端に達すると各 worker は自分で抜ける
pub struct WorkerGroup {
    shutdown: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

/// worker が共有する依存
#[derive(Clone)]
pub struct WorkerDeps {
    pub runtime: Arc<Runtime>,
    /// dispatcher 全体で共有する同時実行数の上限
    pub capacity: Arc<Semaphore>,
    pub store: Arc<dyn RunStore>,
}

impl WorkerGroup {
    /// Spawn `n` workers for `instance`.
    pub fn spawn(n: usize, instance: Arc<ChainInstance>, deps: WorkerDeps) -> Self {
        let shutdown = CancellationToken::new();

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let instance = Arc::clone(&instance);
            let deps = deps.clone();
            let shutdown = shutdown.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, instance, deps, shutdown).await;
            });
            joins.push(join);
        }

        Self { shutdown, joins }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.joins.iter().all(JoinHandle::is_finished)
    }

    /// 自然終了を待つ（チェーンが終端に達すると全 worker が抜ける）
    pub async fn join(self) {
        for j in self.joins {
            let _ = j.await;
        }
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        self.join().await;
    }
}

async fn worker_loop(
    worker_id: usize,
    instance: Arc<ChainInstance>,
    deps: WorkerDeps,
    shutdown: CancellationToken,
) {
    let chain_id = instance.chain_id();
    debug!(%chain_id, worker_id, "worker started");

    loop {
        // 1. READY が出るまで待つ
        let work = tokio::select! {
            _ = shutdown.cancelled() => break,
            work = instance.wait_for_work() => work,
        };
        if work == WorkState::Finished {
            break;
        }

        // 2. 全体の枠を取る
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = Arc::clone(&deps.capacity).acquire_owned() => match permit {
                Ok(permit) => permit,
                // semaphore が閉じられた = dispatcher が止まった
                Err(_) => break,
            },
        };

        // 3. 排他的に claim（他の worker に取られていたらやり直し）
        let Some(lease) = instance.try_claim().await else {
            drop(permit);
            continue;
        };

        // 4. ロックの外で実行。panic は JoinError として拾う
        let runtime = Arc::clone(&deps.runtime);
        let ctx = lease.context().clone();
        let mut handle = tokio::spawn(async move { runtime.run_attempt(ctx).await });

        let result = tokio::select! {
            joined = &mut handle => match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(%chain_id, job = %lease.job_id(), attempt = lease.attempt(), error = %e, "handler panicked");
                    Err(ExecutionError::handler(format!("handler panicked: {e}")))
                }
            },
            _ = shutdown.cancelled() => {
                // 報告せずに抜ける。ジョブは RUNNING のまま保存され、再開時に中断扱いになる
                handle.abort();
                debug!(%chain_id, worker_id, job = %lease.job_id(), "attempt abandoned by shutdown");
                break;
            }
        };
        drop(permit);

        // 5. 報告と保存
        let snapshot = lease.complete(result).await;
        if let Err(e) = deps.store.save(&snapshot).await {
            warn!(%chain_id, revision = snapshot.revision, error = %e, "failed to persist snapshot");
        }
    }

    debug!(%chain_id, worker_id, "worker stopped");
}
