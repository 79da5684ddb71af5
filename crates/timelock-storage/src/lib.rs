//! timelock-storage: `FlowStore` backends.
//!
//! Backends:
//! - [`memory`]: in-memory (default; tests and single-process deployments)
//! - [`sqlite`]: SQLite via `sqlx`, one table per standard

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryFlowStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteFlowStore;
