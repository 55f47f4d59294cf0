//! Graph model: 検証済み DAG と依存グラフ

pub mod chain;
pub mod dependency;

pub use self::chain::JobChain;
pub use self::dependency::DependencyGraph;
