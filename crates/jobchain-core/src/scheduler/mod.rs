//! Frontier scheduler: 実行可能集合の計算と失敗の伝播

pub mod frontier;

pub use self::frontier::{
    blocking_prerequisite, frontier, newly_ready, prerequisites_satisfied, skip_targets,
};
