//! Implementations of the ports for development and tests.

pub mod memory_store;

pub use self::memory_store::InMemoryRunStore;
