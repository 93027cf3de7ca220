//! Domain types for the Arbor task store.
//!
//! These types represent the persisted state of tasks, jobs, allocations,
//! task-spec snapshots, and context directories. All types are serializable
//! to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

use arbor_core::{AllocationId, GenericTaskConfig, JobId, TaskId};

// ── Task ──────────────────────────────────────────────────────────

/// Kind of task. Only generic tasks are driven by this control plane;
/// other kinds are produced by other subsystems and share the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Generic,
    Trial,
    Notebook,
    Shell,
    Command,
    Tensorboard,
    CheckpointGc,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Active,
    Paused,
    StoppingPaused,
    StoppingCanceled,
    StoppingCompleted,
    StoppingError,
    Canceled,
    Completed,
    Error,
}

impl TaskState {
    pub const ALL: [TaskState; 9] = [
        TaskState::Active,
        TaskState::Paused,
        TaskState::StoppingPaused,
        TaskState::StoppingCanceled,
        TaskState::StoppingCompleted,
        TaskState::StoppingError,
        TaskState::Canceled,
        TaskState::Completed,
        TaskState::Error,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Canceled | TaskState::Completed | TaskState::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Active => "ACTIVE",
            TaskState::Paused => "PAUSED",
            TaskState::StoppingPaused => "STOPPING_PAUSED",
            TaskState::StoppingCanceled => "STOPPING_CANCELED",
            TaskState::StoppingCompleted => "STOPPING_COMPLETED",
            TaskState::StoppingError => "STOPPING_ERROR",
            TaskState::Canceled => "CANCELED",
            TaskState::Completed => "COMPLETED",
            TaskState::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A schedulable unit of work; a node in the parent/child forest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub job_id: JobId,
    /// Weak link to the parent task. Immutable after creation.
    pub parent_id: Option<TaskId>,
    pub state: TaskState,
    /// `None` means unset: the task root may still be paused, descendants may not.
    pub no_pause: Option<bool>,
    /// Unix timestamp (seconds) when the task was created.
    pub start_time: u64,
    /// Unix timestamp (seconds) when the task last stopped running.
    pub end_time: Option<u64>,
    /// Task whose configuration seeded this one.
    pub forked_from: Option<TaskId>,
    /// Serialized launch configuration.
    pub config: Option<String>,
}

// ── Job ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Generic,
    Experiment,
    Notebook,
    Shell,
    Command,
    Tensorboard,
}

/// Scheduling-priority grouping owning a task tree's root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: JobId,
    pub job_type: JobType,
    pub owner_id: String,
    pub priority: Option<i32>,
}

// ── Allocation ────────────────────────────────────────────────────

/// One concrete resource-allocation attempt for a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Allocation {
    pub allocation_id: AllocationId,
    pub slots: u32,
    pub resource_pool: String,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
}

impl Allocation {
    pub fn task_id(&self) -> &TaskId {
        &self.allocation_id.task_id
    }

    pub fn is_running(&self) -> bool {
        self.end_time.is_none()
    }
}

// ── Task spec snapshot ────────────────────────────────────────────

/// Everything needed to relaunch a generic task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenericTaskSpec {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub owner_id: String,
    pub project_id: Option<String>,
    pub config: GenericTaskConfig,
    /// Resource pool resolved at creation time.
    pub resource_pool: String,
}

/// Persisted launch spec plus the allocation that was current when it was taken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSpecSnapshot {
    pub task_id: TaskId,
    pub allocation_id: AllocationId,
    pub spec: GenericTaskSpec,
}

// ── Context directory ─────────────────────────────────────────────

/// A file shipped alongside a task's launch config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextFile {
    pub path: String,
    pub content: Vec<u8>,
}
