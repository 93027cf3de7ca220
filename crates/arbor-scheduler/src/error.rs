//! Scheduler error types.

use std::fmt::Display;

use thiserror::Error;

use arbor_core::{JobId, TaskId};
use arbor_state::{StateError, TaskState};

/// Errors that can occur during task orchestration.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("no task spec snapshot for task {0}")]
    SnapshotNotFound(TaskId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cannot {action} task {task_id} in state {state}")]
    InvalidState {
        task_id: TaskId,
        state: TaskState,
        action: &'static str,
    },

    #[error("task {0} is marked as not pausable")]
    NotPausable(TaskId),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("state store error for {id}: {source}")]
    State {
        id: String,
        #[source]
        source: StateError,
    },

    #[error("resource manager error for {id}: {message}")]
    ResourceManager { id: String, message: String },

    #[error("launch config for {id} is unreadable: {message}")]
    Config { id: String, message: String },
}

/// Coarse error classes exposed to callers of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    InvalidState,
    PermissionDenied,
    Internal,
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::TaskNotFound(_)
            | SchedulerError::JobNotFound(_)
            | SchedulerError::SnapshotNotFound(_) => ErrorKind::NotFound,
            SchedulerError::State { source, .. } if source.is_not_found() => ErrorKind::NotFound,
            SchedulerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SchedulerError::InvalidState { .. } | SchedulerError::NotPausable(_) => {
                ErrorKind::InvalidState
            }
            SchedulerError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            SchedulerError::State { .. }
            | SchedulerError::ResourceManager { .. }
            | SchedulerError::Config { .. } => ErrorKind::Internal,
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Attach the id of the task, job, or allocation being worked on to a
/// store error.
pub(crate) trait StoreContext<T> {
    fn for_id(self, id: impl Display) -> SchedulerResult<T>;
}

impl<T> StoreContext<T> for Result<T, StateError> {
    fn for_id(self, id: impl Display) -> SchedulerResult<T> {
        self.map_err(|source| SchedulerError::State {
            id: id.to_string(),
            source,
        })
    }
}
