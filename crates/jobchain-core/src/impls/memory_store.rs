//! In-memory RunStore (開発・テスト用)

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{ChainId, ChainSnapshot};
use crate::error::Result;
use crate::ports::RunStore;

#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    snapshots: Mutex<HashMap<ChainId, ChainSnapshot>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.snapshots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.lock().await.is_empty()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, snapshot: &ChainSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.lock().await;
        match snapshots.get(&snapshot.chain_id) {
            Some(stored) if stored.revision >= snapshot.revision => {
                tracing::trace!(
                    chain_id = %snapshot.chain_id,
                    stored = stored.revision,
                    incoming = snapshot.revision,
                    "ignoring stale snapshot"
                );
            }
            _ => {
                snapshots.insert(snapshot.chain_id, snapshot.clone());
            }
        }
        Ok(())
    }

    async fn load(&self, chain_id: ChainId) -> Result<Option<ChainSnapshot>> {
        Ok(self.snapshots.lock().await.get(&chain_id).cloned())
    }

    async fn unfinished(&self) -> Result<Vec<ChainSnapshot>> {
        let snapshots = self.snapshots.lock().await;
        let mut unfinished: Vec<ChainSnapshot> = snapshots
            .values()
            .filter(|s| !s.status.is_terminal())
            .cloned()
            .collect();
        unfinished.sort_by_key(|s| s.chain_id);
        Ok(unfinished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChainStatus, FailurePolicy};
    use chrono::Utc;
    use ulid::Ulid;

    fn snapshot(chain_id: ChainId, revision: u64, status: ChainStatus) -> ChainSnapshot {
        ChainSnapshot {
            chain_id,
            status,
            failure_policy: FailurePolicy::FailFast,
            revision,
            submitted_at: Utc::now(),
            finished_at: None,
            jobs: Vec::new(),
        }
    }

    #[tokio::test]
    async fn keeps_only_the_newest_revision() {
        let store = InMemoryRunStore::new();
        let id = ChainId::from_ulid(Ulid::new());

        store.save(&snapshot(id, 5, ChainStatus::Running)).await.unwrap();
        store.save(&snapshot(id, 3, ChainStatus::Succeeded)).await.unwrap();

        let loaded = store.load(id).await.unwrap().unwrap();
        assert_eq!(loaded.revision, 5);
        assert_eq!(loaded.status, ChainStatus::Running);
    }

    #[tokio::test]
    async fn unfinished_excludes_terminal_chains() {
        let store = InMemoryRunStore::new();
        let running = ChainId::from_ulid(Ulid::new());
        let done = ChainId::from_ulid(Ulid::new());

        store.save(&snapshot(running, 1, ChainStatus::Running)).await.unwrap();
        store.save(&snapshot(done, 1, ChainStatus::Failed)).await.unwrap();

        let unfinished = store.unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].chain_id, running);
        assert_eq!(store.len().await, 2);
    }
}
