//! Allocation start and resumption.
//!
//! Every start of a generic task, first launch or resume, goes through
//! [`AllocationLauncher::start`]: record the allocation, ask the resource
//! manager for it, snapshot the launch spec under the new allocation id, and
//! make sure the job has a priority callback.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use arbor_core::{AllocationId, TaskId};
use arbor_state::{Allocation, GenericTaskSpec, StateStore, TaskSpecSnapshot};

use crate::error::{SchedulerError, SchedulerResult, StoreContext};
use crate::exit::record_allocation_exit;
use crate::priority::{PriorityCallback, PriorityRegistry};
use crate::rm::{
    AllocateRequest, AllocationExit, ExitHandler, FittingRequirements, ResourceManager,
};

/// The allocation id to use for the next start of `task_id`: specifier 1 for
/// a task that never ran, otherwise one past `latest`.
pub fn next_allocation_id(task_id: &TaskId, latest: Option<&AllocationId>) -> AllocationId {
    match latest {
        Some(latest) => latest.next(),
        None => AllocationId::first(task_id.clone()),
    }
}

/// Starts allocations for generic tasks.
#[derive(Clone)]
pub struct AllocationLauncher {
    store: StateStore,
    rm: Arc<dyn ResourceManager>,
    priorities: Arc<PriorityRegistry>,
    preemptible: bool,
}

impl AllocationLauncher {
    pub fn new(
        store: StateStore,
        rm: Arc<dyn ResourceManager>,
        priorities: Arc<PriorityRegistry>,
        preemptible: bool,
    ) -> Self {
        Self {
            store,
            rm,
            priorities,
            preemptible,
        }
    }

    /// Start `allocation_id` for the task described by `spec`.
    ///
    /// The allocation row is written before the request goes out so an
    /// early exit report always finds it. If the resource manager refuses
    /// the request the row is closed again and the error is returned.
    pub async fn start(
        &self,
        spec: &GenericTaskSpec,
        allocation_id: AllocationId,
    ) -> SchedulerResult<()> {
        let allocation = Allocation {
            allocation_id: allocation_id.clone(),
            slots: spec.config.resources.slots,
            resource_pool: spec.resource_pool.clone(),
            start_time: Some(epoch_secs()),
            end_time: None,
        };
        self.store
            .put_allocation(&allocation)
            .for_id(&allocation_id)?;

        let request = AllocateRequest {
            allocation_id: allocation_id.clone(),
            task_id: spec.task_id.clone(),
            job_id: spec.job_id.clone(),
            slots_needed: spec.config.resources.slots,
            resource_pool: spec.resource_pool.clone(),
            fitting: FittingRequirements { single_agent: true },
            preemptible: self.preemptible,
            restore: false,
            on_exit: self.exit_handler(),
        };
        if let Err(e) = self.rm.allocate(request).await {
            if let Err(close) = self.store.complete_allocation(&allocation_id, epoch_secs()) {
                warn!(%allocation_id, error = %close, "failed to close refused allocation");
            }
            return Err(SchedulerError::ResourceManager {
                id: allocation_id.to_string(),
                message: e.to_string(),
            });
        }

        self.store
            .upsert_spec_snapshot(&TaskSpecSnapshot {
                task_id: spec.task_id.clone(),
                allocation_id: allocation_id.clone(),
                spec: spec.clone(),
            })
            .for_id(&spec.task_id)?;

        let callback = self.priority_callback(spec);
        self.priorities.register_if_absent(&spec.job_id, callback);

        info!(
            task_id = %spec.task_id,
            %allocation_id,
            slots = spec.config.resources.slots,
            resource_pool = %spec.resource_pool,
            "allocation requested"
        );
        Ok(())
    }

    fn exit_handler(&self) -> ExitHandler {
        let store = self.store.clone();
        let priorities = Arc::clone(&self.priorities);
        Arc::new(move |exit: AllocationExit| {
            if let Err(e) = record_allocation_exit(&store, &priorities, &exit) {
                warn!(allocation_id = %exit.allocation_id, error = %e, "failed to record allocation exit");
            }
        })
    }

    /// Persists a priority change on the job and on the task's snapshot so
    /// the next resume carries it.
    fn priority_callback(&self, spec: &GenericTaskSpec) -> PriorityCallback {
        let store = self.store.clone();
        let task_id = spec.task_id.clone();
        let job_id = spec.job_id.clone();
        Arc::new(move |priority: i32| -> SchedulerResult<()> {
            store.set_job_priority(&job_id, priority).for_id(&job_id)?;
            store
                .update_spec_snapshot(&task_id, |snapshot| {
                    snapshot.spec.config.resources.priority = Some(priority);
                })
                .for_id(&task_id)?;
            Ok(())
        })
    }
}

/// Current Unix epoch in seconds.
pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_task_starts_at_one() {
        let id = next_allocation_id(&TaskId::from("t"), None);
        assert_eq!(id, AllocationId::new(TaskId::from("t"), 1));
    }

    #[test]
    fn resume_increments_specifier() {
        for n in [1, 2, 7, 41] {
            let latest = AllocationId::new(TaskId::from("t"), n);
            let next = next_allocation_id(&TaskId::from("t"), Some(&latest));
            assert_eq!(next.specifier, n + 1);
            assert_eq!(next.task_id, TaskId::from("t"));
        }
    }

    #[test]
    fn epoch_secs_returns_reasonable_value() {
        let now = epoch_secs();
        // Should be after 2024-01-01.
        assert!(now > 1_704_067_200);
    }
}
