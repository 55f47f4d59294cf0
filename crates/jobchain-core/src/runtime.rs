use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{AttemptId, CancellationError, ChainId, ExecutionError, JobId, JobOutput};
use crate::error::DispatchError;
use crate::typed::{Handler, TypedHandler, TypedJob};

/// 1 回の試行に渡す実行コンテキスト
#[derive(Debug, Clone)]
pub struct JobContext {
    pub chain_id: ChainId,
    pub job_id: JobId,
    pub attempt_id: AttemptId,
    /// 1 始まり
    pub attempt: u32,
    pub handler: String,
    pub payload: serde_json::Value,
    /// 直接の前提ジョブが残した artifact
    pub upstream: BTreeMap<JobId, serde_json::Value>,
    pub timeout: Option<Duration>,
    pub cancellation: CancellationToken,
}

impl JobContext {
    pub fn upstream(&self, job_id: &str) -> Option<&serde_json::Value> {
        self.upstream.get(job_id)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// A handler for a specific job type.
///
/// payload の解釈は handler に任せる。型付きで受けたい場合は `typed::Handler` を使う。
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, ctx: JobContext) -> Result<JobOutput, ExecutionError>;
}

/// Registry of handlers (handler type -> handler).
///
/// Design:
/// - Built during initialization (mutable).
/// - Used during runtime (immutable, shared through `Arc`).
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同じ型を二度登録するとエラー（起動時に気づけるように）
    pub fn register(
        &mut self,
        handler_type: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> Result<(), DispatchError> {
        let handler_type = handler_type.into();
        if self.handlers.contains_key(&handler_type) {
            return Err(DispatchError::DuplicateHandler(handler_type));
        }
        self.handlers.insert(handler_type, handler);
        Ok(())
    }

    /// `T::TYPE` で登録する
    pub fn register_typed<T, H>(&mut self, handler: H) -> Result<(), DispatchError>
    where
        T: TypedJob,
        H: Handler<T> + 'static,
    {
        self.register(T::TYPE, Arc::new(TypedHandler::<T, H>::new(handler)))
    }

    pub fn get(&self, handler_type: &str) -> Option<&Arc<dyn JobHandler>> {
        self.handlers.get(handler_type)
    }

    pub fn contains(&self, handler_type: &str) -> bool {
        self.handlers.contains_key(handler_type)
    }

    pub fn handler_types(&self) -> impl Iterator<Item = &str> + '_ {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Runtime runs one attempt by dispatching to a registered handler.
pub struct Runtime {
    registry: Arc<HandlerRegistry>,
}

impl Runtime {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Run one attempt.
    ///
    /// - 未登録の handler 型は HandlerFailure（JobRun に理由が残る）
    /// - timeout があれば `tokio::time::timeout` で包む
    /// - cancellation token が先に発火したら Cancelled
    pub async fn run_attempt(&self, ctx: JobContext) -> Result<JobOutput, ExecutionError> {
        let Some(handler) = self.registry.get(&ctx.handler) else {
            return Err(ExecutionError::handler(format!(
                "no handler registered for type `{}`",
                ctx.handler
            )));
        };

        let cancellation = ctx.cancellation.clone();
        let limit = ctx.timeout;
        let call = handler.execute(ctx);

        let bounded = async move {
            match limit {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or(Err(ExecutionError::Timeout(limit))),
                None => call.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(CancellationError.into()),
            result = bounded => result,
        }
    }
}
