//! redb table definitions for the Arbor task store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Tasks keyed by `{task_id}`.
pub const TASKS: TableDefinition<&str, &[u8]> = TableDefinition::new("tasks");

/// Jobs keyed by `{job_id}`.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Allocations keyed by `{task_id}.{specifier}`.
pub const ALLOCATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("allocations");

/// Latest launch spec per task, keyed by `{task_id}`.
pub const TASK_SPEC_SNAPSHOTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("task_spec_snapshots");

/// Context directory files per task, keyed by `{task_id}`.
pub const CONTEXT_DIRECTORIES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("context_directories");
