//! DispatcherBuilder - dispatcher の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - 同じ handler 型の二重登録は register() の時点でエラー
//! - expect_handlers() で期待される handler 型を宣言し、build() 時に
//!   「期待集合 ⊆ 登録済み集合」をチェック
//! - 設定値の検証も build() で行う

use std::sync::Arc;

use tokio::sync::Semaphore;

use super::dispatcher::Dispatcher;
use crate::config::DispatcherConfig;
use crate::coordinator::{Collaborators, WorkerDeps};
use crate::domain::{Decider, DefaultDecider};
use crate::error::{DispatchError, Result};
use crate::impls::InMemoryRunStore;
use crate::ports::{Clock, IdGenerator, RunStore, SystemClock, UlidGenerator};
use crate::runtime::{HandlerRegistry, JobHandler, Runtime};
use crate::typed::{Handler, TypedJob};

/// ```ignore
/// let dispatcher = DispatcherBuilder::new(config)
///     .register("print", Arc::new(PrintHandler))?
///     .register_typed::<Resize, _>(ResizeHandler)?
///     .expect_handlers(&["print", Resize::TYPE])
///     .build()?;
/// ```
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    registry: HandlerRegistry,
    expected_handlers: Option<Vec<String>>,
    store: Option<Arc<dyn RunStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    decider: Option<Arc<dyn Decider>>,
}

impl DispatcherBuilder {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
            expected_handlers: None,
            store: None,
            clock: None,
            ids: None,
            decider: None,
        }
    }

    pub fn register(
        mut self,
        handler_type: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> Result<Self> {
        self.registry.register(handler_type, handler)?;
        Ok(self)
    }

    pub fn register_typed<T: TypedJob, H: Handler<T> + 'static>(mut self, handler: H) -> Result<Self> {
        self.registry.register_typed::<T, H>(handler)?;
        Ok(self)
    }

    pub fn expect_handlers(mut self, handler_types: &[&str]) -> Self {
        self.expected_handlers = Some(handler_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// 既定は InMemoryRunStore
    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn build(self) -> Result<Dispatcher> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_handlers {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(DispatchError::MissingHandlers(missing));
            }
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let decider = self.decider.unwrap_or_else(|| Arc::new(DefaultDecider));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryRunStore::new()));

        tracing::debug!(
            handlers = self.registry.len(),
            worker_capacity = self.config.worker_capacity,
            "dispatcher built"
        );

        Ok(Dispatcher::new(
            self.config.clone(),
            WorkerDeps {
                runtime: Arc::new(Runtime::new(Arc::new(self.registry))),
                capacity: Arc::new(Semaphore::new(self.config.worker_capacity)),
                store,
            },
            Collaborators { clock, ids, decider },
        ))
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutionError, JobOutput};
    use crate::runtime::JobContext;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn execute(&self, _ctx: JobContext) -> std::result::Result<JobOutput, ExecutionError> {
            Ok(JobOutput::empty())
        }
    }

    #[test]
    fn build_succeeds_when_expected_handlers_are_registered() {
        let built = DispatcherBuilder::default()
            .register("noop", Arc::new(Noop))
            .unwrap()
            .expect_handlers(&["noop"])
            .build();
        assert!(built.is_ok());
    }

    #[test]
    fn build_reports_missing_handlers() {
        let built = DispatcherBuilder::default()
            .register("noop", Arc::new(Noop))
            .unwrap()
            .expect_handlers(&["noop", "resize", "upload"])
            .build();
        assert!(matches!(
            built,
            Err(DispatchError::MissingHandlers(missing)) if missing == vec!["resize".to_string(), "upload".to_string()]
        ));
    }

    #[test]
    fn duplicate_registration_fails_fast() {
        let result = DispatcherBuilder::default()
            .register("noop", Arc::new(Noop))
            .unwrap()
            .register("noop", Arc::new(Noop));
        assert!(matches!(result, Err(DispatchError::DuplicateHandler(t)) if t == "noop"));
    }

    #[test]
    fn invalid_config_fails_the_build() {
        let config = DispatcherConfig {
            worker_capacity: 0,
            ..DispatcherConfig::default()
        };
        assert!(matches!(
            DispatcherBuilder::new(config).build(),
            Err(DispatchError::Config(_))
        ));
    }
}
