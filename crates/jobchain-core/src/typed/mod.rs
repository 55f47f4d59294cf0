//! Typed - 型付き Job API
//!
//! # 二層構造
//! - **表層（Typed）**: `TypedJob` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `runtime::JobHandler` - object-safe, registry に格納する形

pub mod handler;
pub mod job;

pub use self::handler::{Handler, TypedHandler};
pub use self::job::TypedJob;
