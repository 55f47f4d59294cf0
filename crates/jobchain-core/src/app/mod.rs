//! App - アプリケーション層
//!
//! - **DispatcherBuilder**: handler 登録と起動時検証
//! - **Dispatcher**: チェーンの投入・状態取得・キャンセル・再開・終了

pub mod builder;
pub mod dispatcher;

pub use self::builder::DispatcherBuilder;
pub use self::dispatcher::{Dispatcher, ShutdownMode};
