//! DispatchError: crate 全体のエラー

use thiserror::Error;

use crate::domain::{ChainId, GraphError, TransitionError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("chain not found: {0}")]
    ChainNotFound(ChainId),

    #[error("chain {0} is already active in this dispatcher")]
    ChainAlreadyActive(ChainId),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("invalid chain policy: {0}")]
    InvalidPolicy(String),

    #[error("snapshot does not match the chain definition: {0}")]
    SnapshotMismatch(String),

    #[error("duplicate handler for type `{0}`")]
    DuplicateHandler(String),

    #[error("missing handlers for types: {}", .0.join(", "))]
    MissingHandlers(Vec<String>),

    #[error("run store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    /// dispatcher が終了し、完了通知がもう来ない
    #[error("chain {0} was abandoned before reaching a terminal status")]
    Abandoned(ChainId),
}

pub type Result<T, E = DispatchError> = std::result::Result<T, E>;
