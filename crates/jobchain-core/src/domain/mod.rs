//! Domain - チェーン定義と実行記録のモデル
//!
//! - ids: ChainId / AttemptId (ULID), JobId (文字列)
//! - spec: JobSpec, ChainPolicy, FailurePolicy
//! - state: JobState（遷移表）, ChainStatus
//! - run: JobRun（実行時レコード）
//! - snapshot: ChainSnapshot
//! - decision: Decider（retry するか諦めるか）
//! - errors: GraphError, ExecutionError, CancellationError, FailureReason

pub mod attempt;
pub mod decision;
pub mod errors;
pub mod ids;
pub mod millis;
pub mod outcome;
pub mod run;
pub mod snapshot;
pub mod spec;
pub mod state;

pub use self::attempt::{AttemptRecord, DecisionRecord};
pub use self::decision::{Decider, Decision, DefaultDecider};
pub use self::errors::{
    CancellationError, ExecutionError, FailureReason, GraphError, TransitionError,
};
pub use self::ids::{AttemptId, ChainId, Id, IdMarker, JobId};
pub use self::outcome::{JobOutput, OutcomeKind};
pub use self::run::JobRun;
pub use self::snapshot::ChainSnapshot;
pub use self::spec::{ChainPolicy, FailurePolicy, JobSpec};
pub use self::state::{ChainStatus, JobState};
