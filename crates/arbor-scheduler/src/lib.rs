//! arbor-scheduler — generic task lifecycle orchestration.
//!
//! Admits generic tasks, arranges them into a parent/child forest, and
//! drives each task through create, pause, resume, and kill by coordinating
//! with a resource manager. The orchestrator:
//!
//! - Answers tree queries over the task forest (root lookup, descendants)
//! - Propagates state changes across a task's subtree in one atomic write
//! - Starts, signals, and resumes allocations with versioned allocation ids
//! - Keeps launch-spec snapshots so a paused task can be relaunched
//! - Registers per-job callbacks for live priority changes
//!
//! # Architecture
//!
//! ```text
//! TaskService
//!   ├── Authorizer (gate every operation)
//!   ├── TaskForest (find_root, children, descendants)
//!   ├── propagate_task_state (bulk state write)
//!   ├── AllocationLauncher
//!   │     ├── ResourceManager (allocate, signal)
//!   │     ├── StateStore (allocations, spec snapshots)
//!   │     └── PriorityRegistry (job → priority callback)
//!   └── exit handling (allocation exit → task state)
//! ```

pub mod allocation;
pub mod authz;
pub mod error;
pub mod exit;
pub mod forest;
pub mod lifecycle;
pub mod priority;
pub mod propagate;
pub mod rm;

pub use allocation::{next_allocation_id, AllocationLauncher};
pub use authz::{Action, AllowAll, AuthzError, Authorizer, User};
pub use error::{ErrorKind, SchedulerError, SchedulerResult};
pub use exit::record_allocation_exit;
pub use forest::TaskForest;
pub use lifecycle::{CreateTaskRequest, CreatedTask, TaskService};
pub use priority::{PriorityCallback, PriorityRegistry};
pub use propagate::propagate_task_state;
pub use rm::{
    AllocateRequest, AllocationExit, ExitHandler, ExitReason, FittingRequirements,
    ResourceManager, RmError, SignalKind,
};
