//! Handler trait - 型付き payload を受け取る handler
//!
//! `TypedHandler<T, H>` が JSON payload を `T` に decode して `JobHandler` として振る舞う
//! （type erasure）。decode の失敗は HandlerFailure になる。

use std::marker::PhantomData;

use async_trait::async_trait;

use super::job::TypedJob;
use crate::domain::{ExecutionError, JobOutput};
use crate::runtime::{JobContext, JobHandler};

#[async_trait]
pub trait Handler<T: TypedJob>: Send + Sync {
    async fn handle(&self, job: T, ctx: &JobContext) -> Result<JobOutput, ExecutionError>;
}

pub struct TypedHandler<T: TypedJob, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TypedJob, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TypedJob, H: Handler<T>> JobHandler for TypedHandler<T, H> {
    async fn execute(&self, ctx: JobContext) -> Result<JobOutput, ExecutionError> {
        let job: T = serde_json::from_value(ctx.payload.clone()).map_err(|e| {
            ExecutionError::handler(format!("payload decode for `{}`: {e}", T::TYPE))
        })?;
        self.handler.handle(job, &ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AttemptId, ChainId, JobId};
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use tokio_util::sync::CancellationToken;
    use ulid::Ulid;

    #[derive(Debug, Serialize, Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    impl TypedJob for Add {
        const TYPE: &'static str = "math.add.v1";
    }

    struct AddHandler;

    #[async_trait]
    impl Handler<Add> for AddHandler {
        async fn handle(&self, job: Add, _ctx: &JobContext) -> Result<JobOutput, ExecutionError> {
            Ok(JobOutput::with_artifact(serde_json::json!(job.a + job.b)))
        }
    }

    fn ctx(payload: serde_json::Value) -> JobContext {
        JobContext {
            chain_id: ChainId::from_ulid(Ulid::new()),
            job_id: JobId::from("sum"),
            attempt_id: AttemptId::from_ulid(Ulid::new()),
            attempt: 1,
            handler: Add::TYPE.to_string(),
            payload,
            upstream: BTreeMap::new(),
            timeout: None,
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn decodes_payload_into_the_typed_job() {
        let handler = TypedHandler::<Add, _>::new(AddHandler);
        let out = handler
            .execute(ctx(serde_json::json!({ "a": 2, "b": 3 })))
            .await
            .unwrap();
        assert_eq!(out.artifact, Some(serde_json::json!(5)));
    }

    #[tokio::test]
    async fn bad_payload_is_a_handler_failure() {
        let handler = TypedHandler::<Add, _>::new(AddHandler);
        let err = handler
            .execute(ctx(serde_json::json!({ "a": "two" })))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::HandlerFailure(msg) if msg.contains("math.add.v1")));
    }
}
