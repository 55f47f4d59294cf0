//! Dispatcher - チェーンのレジストリ
//!
//! プロセス内に 1 つ作り、`shutdown` で片付ける明示的なオブジェクト。
//! 終端に達したチェーンは最終 snapshot を RunStore に渡してからレジストリから外す。
//! 外した後の `get_status` / `completion` は RunStore から答える。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::DispatcherConfig;
use crate::coordinator::state::ChainState;
use crate::coordinator::{ChainInstance, Collaborators, WorkerDeps, WorkerGroup};
use crate::domain::{ChainId, ChainPolicy, ChainSnapshot, JobSpec};
use crate::error::{DispatchError, Result};
use crate::graph::JobChain;
use crate::supervisor::CompletionSignal;

fn validate_policies(jobs: &[JobSpec], policy: &ChainPolicy) -> Result<()> {
    policy.validate().map_err(DispatchError::InvalidPolicy)?;
    for job in jobs {
        job.validate().map_err(DispatchError::InvalidPolicy)?;
    }
    Ok(())
}

/// shutdown の方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// 全チェーンが終端に達するまで待つ
    Drain,
    /// worker を止め、実行中の試行を打ち切って snapshot を保存する（再開前提）
    Suspend,
}

struct ChainEntry {
    instance: Arc<ChainInstance>,
    workers: WorkerGroup,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    deps: WorkerDeps,
    collab: Collaborators,
    chains: RwLock<HashMap<ChainId, ChainEntry>>,
}

impl Dispatcher {
    pub(crate) fn new(config: DispatcherConfig, deps: WorkerDeps, collab: Collaborators) -> Self {
        Self {
            config,
            deps,
            collab,
            chains: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// チェーンを検証して実行を始める
    ///
    /// グラフの検証エラーはここで同期的に返り、インスタンスは作られない。
    pub async fn submit_chain(&self, jobs: Vec<JobSpec>, policy: ChainPolicy) -> Result<ChainSnapshot> {
        validate_policies(&jobs, &policy)?;
        let chain = Arc::new(JobChain::build(jobs, policy)?);
        self.evict_settled().await;

        let chain_id = self.collab.ids.generate_chain_id();
        let state = ChainState::new(chain_id, Arc::clone(&chain), self.collab.clock.now());
        info!(
            %chain_id,
            jobs = chain.len(),
            edges = chain.edge_count(),
            max_concurrency = chain.policy().max_concurrency,
            "chain submitted"
        );
        self.start(chain, state).await
    }

    /// 再起動後、永続化された snapshot からチェーンを再開する
    pub async fn resume(
        &self,
        jobs: Vec<JobSpec>,
        policy: ChainPolicy,
        persisted: ChainSnapshot,
    ) -> Result<ChainSnapshot> {
        validate_policies(&jobs, &policy)?;
        let chain = Arc::new(JobChain::build(jobs, policy)?);

        // 終端済みでまだ外していないチェーンは再開を妨げない
        self.evict_settled().await;
        let chain_id = persisted.chain_id;
        if self.chains.read().await.contains_key(&chain_id) {
            return Err(DispatchError::ChainAlreadyActive(chain_id));
        }

        let state = ChainState::restore(Arc::clone(&chain), persisted, self.collab.clock.now())?;
        self.start(chain, state).await
    }

    async fn start(&self, chain: Arc<JobChain>, state: ChainState) -> Result<ChainSnapshot> {
        let snapshot = state.snapshot();
        self.deps.store.save(&snapshot).await?;

        let instance = ChainInstance::new(Arc::clone(&chain), state, self.collab.clone());
        let workers = WorkerGroup::spawn(
            chain.policy().max_concurrency,
            Arc::clone(&instance),
            self.deps.clone(),
        );
        self.chains
            .write()
            .await
            .insert(snapshot.chain_id, ChainEntry { instance, workers });
        Ok(snapshot)
    }

    fn instance(entry: Option<&ChainEntry>) -> Option<Arc<ChainInstance>> {
        entry.map(|e| Arc::clone(&e.instance))
    }

    pub async fn get_status(&self, chain_id: ChainId) -> Option<ChainSnapshot> {
        let instance = Self::instance(self.chains.read().await.get(&chain_id));
        if let Some(instance) = instance {
            return Some(instance.snapshot().await);
        }
        match self.deps.store.load(chain_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(%chain_id, error = %e, "failed to load snapshot");
                None
            }
        }
    }

    /// 冪等。終端済みのチェーンには何もしない
    pub async fn cancel(&self, chain_id: ChainId) -> Result<()> {
        let instance = Self::instance(self.chains.read().await.get(&chain_id));
        match instance {
            Some(instance) => {
                if let Some(snapshot) = instance.cancel().await {
                    self.deps.store.save(&snapshot).await?;
                }
                Ok(())
            }
            None => match self.deps.store.load(chain_id).await? {
                // レジストリから外れている = 終端済み
                Some(_) => Ok(()),
                None => Err(DispatchError::ChainNotFound(chain_id)),
            },
        }
    }

    pub async fn completion(&self, chain_id: ChainId) -> Result<CompletionSignal> {
        let instance = Self::instance(self.chains.read().await.get(&chain_id));
        if let Some(instance) = instance {
            return Ok(instance.completion());
        }
        match self.deps.store.load(chain_id).await? {
            Some(snapshot) if snapshot.status.is_terminal() => {
                Ok(CompletionSignal::resolved(snapshot))
            }
            Some(_) => Err(DispatchError::Abandoned(chain_id)),
            None => Err(DispatchError::ChainNotFound(chain_id)),
        }
    }

    /// 終端に達していないチェーン
    pub async fn active_chains(&self) -> Vec<ChainId> {
        let instances: Vec<Arc<ChainInstance>> = self
            .chains
            .read()
            .await
            .values()
            .map(|e| Arc::clone(&e.instance))
            .collect();

        let mut active = Vec::new();
        for instance in instances {
            if !instance.status().await.is_terminal() {
                active.push(instance.chain_id());
            }
        }
        active.sort();
        active
    }

    /// 終端に達し、worker も抜けたチェーンを外す。外した数を返す。
    pub async fn evict_settled(&self) -> usize {
        let mut chains = self.chains.write().await;
        let mut settled = Vec::new();
        for (id, entry) in chains.iter() {
            if entry.workers.is_finished() && entry.instance.is_settled().await {
                settled.push(*id);
            }
        }

        for id in &settled {
            if let Some(entry) = chains.remove(id) {
                let snapshot = entry.instance.snapshot().await;
                if let Err(e) = self.deps.store.save(&snapshot).await {
                    warn!(chain_id = %id, error = %e, "failed to persist final snapshot; keeping chain");
                    chains.insert(*id, entry);
                }
            }
        }
        settled.len()
    }

    /// レジストリを片付ける。最後に保存した snapshot を返す。
    pub async fn shutdown(self, mode: ShutdownMode) -> Result<Vec<ChainSnapshot>> {
        let entries: Vec<ChainEntry> = self.chains.into_inner().into_values().collect();
        info!(chains = entries.len(), ?mode, "dispatcher shutting down");

        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            match mode {
                ShutdownMode::Drain => entry.workers.join().await,
                ShutdownMode::Suspend => entry.workers.shutdown_and_join().await,
            }
            let snapshot = entry.instance.snapshot().await;
            self.deps.store.save(&snapshot).await?;
            snapshots.push(snapshot);
        }

        self.deps.capacity.close();
        snapshots.sort_by_key(|s| s.chain_id);
        Ok(snapshots)
    }
}
