//! Resource manager interface.
//!
//! The control plane decides *when* compute is requested, resumed, or
//! released; the resource manager decides *how*. Requests are
//! fire-and-forget: completion is reported later through the exit handler
//! carried by the allocate request.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use arbor_core::{AllocationId, JobId, TaskId};

/// How an allocation should be stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Stop immediately.
    Kill,
    /// Stop gracefully so the task can be resumed later.
    Terminate,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Kill => f.write_str("kill"),
            SignalKind::Terminate => f.write_str("terminate"),
        }
    }
}

/// Placement constraints passed along with an allocate request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FittingRequirements {
    /// All slots must come from one agent.
    pub single_agent: bool,
}

/// Why an allocation stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Succeeded,
    Failed(String),
    Killed,
    Terminated,
}

/// Reported by the resource manager when an allocation stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationExit {
    pub allocation_id: AllocationId,
    pub reason: ExitReason,
}

/// Invoked once per allocation when it stops.
pub type ExitHandler = Arc<dyn Fn(AllocationExit) + Send + Sync>;

/// A request to start one allocation.
#[derive(Clone)]
pub struct AllocateRequest {
    pub allocation_id: AllocationId,
    pub task_id: TaskId,
    pub job_id: JobId,
    pub slots_needed: u32,
    pub resource_pool: String,
    pub fitting: FittingRequirements,
    pub preemptible: bool,
    /// Always false here: a resume starts a new allocation attempt rather
    /// than restoring one in place.
    pub restore: bool,
    pub on_exit: ExitHandler,
}

impl fmt::Debug for AllocateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocateRequest")
            .field("allocation_id", &self.allocation_id)
            .field("task_id", &self.task_id)
            .field("job_id", &self.job_id)
            .field("slots_needed", &self.slots_needed)
            .field("resource_pool", &self.resource_pool)
            .field("fitting", &self.fitting)
            .field("preemptible", &self.preemptible)
            .field("restore", &self.restore)
            .finish_non_exhaustive()
    }
}

/// Failure reported by the resource manager.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct RmError(pub String);

#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Ask for a new allocation.
    async fn allocate(&self, request: AllocateRequest) -> Result<(), RmError>;

    /// Ask for a running allocation to stop.
    async fn signal(
        &self,
        allocation_id: &AllocationId,
        kind: SignalKind,
        reason: &str,
    ) -> Result<(), RmError>;
}
