//! arbor-state — transactional task store for Arbor.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for tasks, jobs, allocations, task-spec snapshots, and context
//! directories.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Tasks and jobs are keyed by their id, allocations by the display form of
//! their `AllocationId` (`{task_id}.{specifier}`), snapshots and context
//! directories by task id.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{StateStore, StoreTx};
pub use types::*;
