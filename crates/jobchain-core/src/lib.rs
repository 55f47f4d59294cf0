//! jobchain-core
//!
//! DAG で依存関係を宣言したジョブ群（チェーン）を、前提がすべて成功したジョブから
//! 並行に実行する dispatcher。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, spec, state, run, snapshot, decision, errors）
//! - **graph**: 検証済み DAG（重複・未知の依存・循環を投入時に拒否）
//! - **scheduler**: frontier の計算と失敗の伝播（純粋関数）
//! - **coordinator**: claim / 報告 / retry / キャンセルと worker 群
//! - **supervisor**: チェーン状態の評価と完了通知
//! - **runtime**: handler registry と 1 試行の実行（timeout / cancellation）
//! - **typed**: 型付き Job API
//! - **ports** / **impls**: Clock, IdGenerator, RunStore とその開発用実装
//! - **app**: DispatcherBuilder, Dispatcher
//! - **config** / **observability**: TOML 設定と tracing

pub mod app;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod graph;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod runtime;
pub mod scheduler;
pub mod supervisor;
pub mod typed;

pub use app::{Dispatcher, DispatcherBuilder, ShutdownMode};
pub use config::DispatcherConfig;
pub use coordinator::RetryPolicy;
pub use domain::{
    ChainId, ChainPolicy, ChainSnapshot, ChainStatus, ExecutionError, FailurePolicy, JobId,
    JobOutput, JobSpec, JobState,
};
pub use error::{DispatchError, Result};
pub use runtime::{JobContext, JobHandler};
pub use supervisor::CompletionSignal;
