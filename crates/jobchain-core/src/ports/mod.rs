//! Ports - 抽象化レイヤー
//!
//! dispatcher の外側にある協調先（時刻、ID 採番、永続化）を trait で切り出す。
//! 開発・テスト用の実装は `impls` にある。

pub mod clock;
pub mod id_generator;
pub mod run_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::run_store::RunStore;
