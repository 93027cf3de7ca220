//! Allocation exit handling.
//!
//! The resource manager reports each stopped allocation once. The report
//! closes the allocation and settles the owning task's state.

use tracing::{info, warn};

use arbor_state::{StateStore, TaskState};

use crate::allocation::epoch_secs;
use crate::error::{SchedulerError, SchedulerResult, StoreContext};
use crate::priority::PriorityRegistry;
use crate::rm::{AllocationExit, ExitReason};

/// State a task moves to when its current allocation exits, or `None` when
/// the exit does not change it.
pub fn exit_state(current: TaskState, reason: &ExitReason) -> Option<TaskState> {
    match current {
        TaskState::StoppingPaused => Some(TaskState::Paused),
        TaskState::StoppingCanceled => Some(TaskState::Canceled),
        TaskState::StoppingCompleted => Some(TaskState::Completed),
        TaskState::StoppingError => Some(TaskState::Error),
        TaskState::Active => match reason {
            ExitReason::Succeeded => Some(TaskState::Completed),
            ExitReason::Failed(_) | ExitReason::Killed | ExitReason::Terminated => {
                Some(TaskState::Error)
            }
        },
        TaskState::Paused | TaskState::Canceled | TaskState::Completed | TaskState::Error => None,
    }
}

/// Record an allocation exit. Returns the task's new state if it changed.
///
/// Exits of allocations that are no longer the task's latest are recorded
/// on the allocation only.
pub fn record_allocation_exit(
    store: &StateStore,
    priorities: &PriorityRegistry,
    exit: &AllocationExit,
) -> SchedulerResult<Option<TaskState>> {
    let allocation_id = &exit.allocation_id;
    let task_id = &allocation_id.task_id;
    let now = epoch_secs();

    store
        .complete_allocation(allocation_id, now)
        .for_id(allocation_id)?;

    let latest = store.latest_allocation(task_id).for_id(task_id)?;
    if latest.as_ref().map(|a| &a.allocation_id) != Some(allocation_id) {
        warn!(%allocation_id, "exit from superseded allocation ignored");
        return Ok(None);
    }

    let task = store
        .get_task(task_id)
        .for_id(task_id)?
        .ok_or_else(|| SchedulerError::TaskNotFound(task_id.clone()))?;
    let Some(next) = exit_state(task.state, &exit.reason) else {
        return Ok(None);
    };

    store.finish_task(task_id, next, now).for_id(task_id)?;
    if next.is_terminal() {
        priorities.remove(&task.job_id);
    }
    info!(%task_id, %allocation_id, from = %task.state, to = %next, "allocation exited");
    Ok(Some(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arbor_core::{AllocationId, JobId, TaskId};
    use arbor_state::{Allocation, Job, JobType, StateResult, Task, TaskType};

    fn seed(state: TaskState, specifiers: &[u32]) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        let task = Task {
            task_id: TaskId::from("t"),
            task_type: TaskType::Generic,
            job_id: JobId::from("j"),
            parent_id: None,
            state,
            no_pause: None,
            start_time: 100,
            end_time: None,
            forked_from: None,
            config: None,
        };
        let job = Job {
            job_id: JobId::from("j"),
            job_type: JobType::Generic,
            owner_id: "alice".to_string(),
            priority: None,
        };
        store
            .run_in_tx(|tx| -> StateResult<()> {
                tx.add_job(&job)?;
                tx.add_task(&task)
            })
            .unwrap();
        for (i, n) in specifiers.iter().enumerate() {
            store
                .put_allocation(&Allocation {
                    allocation_id: AllocationId::new(TaskId::from("t"), *n),
                    slots: 1,
                    resource_pool: "default".to_string(),
                    start_time: Some(100 + i as u64),
                    end_time: None,
                })
                .unwrap();
        }
        store
    }

    fn exit(n: u32, reason: ExitReason) -> AllocationExit {
        AllocationExit {
            allocation_id: AllocationId::new(TaskId::from("t"), n),
            reason,
        }
    }

    #[test]
    fn stopping_states_settle() {
        let cases = [
            (TaskState::StoppingPaused, TaskState::Paused),
            (TaskState::StoppingCanceled, TaskState::Canceled),
            (TaskState::StoppingCompleted, TaskState::Completed),
            (TaskState::StoppingError, TaskState::Error),
        ];
        for (from, to) in cases {
            assert_eq!(exit_state(from, &ExitReason::Terminated), Some(to));
        }
    }

    #[test]
    fn active_exit_depends_on_reason() {
        assert_eq!(
            exit_state(TaskState::Active, &ExitReason::Succeeded),
            Some(TaskState::Completed)
        );
        assert_eq!(
            exit_state(TaskState::Active, &ExitReason::Failed("oom".into())),
            Some(TaskState::Error)
        );
        assert_eq!(exit_state(TaskState::Paused, &ExitReason::Killed), None);
        assert_eq!(exit_state(TaskState::Canceled, &ExitReason::Succeeded), None);
    }

    #[test]
    fn pause_exit_marks_task_paused() {
        let store = seed(TaskState::StoppingPaused, &[1]);
        let registry = PriorityRegistry::new();
        registry.register_if_absent(&JobId::from("j"), Arc::new(|_| Ok(())));

        let state = record_allocation_exit(&store, &registry, &exit(1, ExitReason::Terminated))
            .unwrap();

        assert_eq!(state, Some(TaskState::Paused));
        let task = store.get_task(&TaskId::from("t")).unwrap().unwrap();
        assert_eq!(task.state, TaskState::Paused);
        assert!(task.end_time.is_some());
        let alloc = store
            .get_allocation(&AllocationId::new(TaskId::from("t"), 1))
            .unwrap()
            .unwrap();
        assert!(!alloc.is_running());
        // Paused is not terminal: the callback stays for priority edits.
        assert!(registry.contains(&JobId::from("j")));
    }

    #[test]
    fn terminal_exit_drops_priority_callback() {
        let store = seed(TaskState::StoppingCanceled, &[1]);
        let registry = PriorityRegistry::new();
        registry.register_if_absent(&JobId::from("j"), Arc::new(|_| Ok(())));

        let state =
            record_allocation_exit(&store, &registry, &exit(1, ExitReason::Killed)).unwrap();

        assert_eq!(state, Some(TaskState::Canceled));
        assert!(!registry.contains(&JobId::from("j")));
    }

    #[test]
    fn superseded_allocation_leaves_task_alone() {
        let store = seed(TaskState::Active, &[1, 2]);
        let registry = PriorityRegistry::new();

        let state =
            record_allocation_exit(&store, &registry, &exit(1, ExitReason::Failed("x".into())))
                .unwrap();

        assert_eq!(state, None);
        let task = store.get_task(&TaskId::from("t")).unwrap().unwrap();
        assert_eq!(task.state, TaskState::Active);
    }

    #[test]
    fn unknown_allocation_is_an_error() {
        let store = seed(TaskState::Active, &[1]);
        let registry = PriorityRegistry::new();
        let err = record_allocation_exit(&store, &registry, &exit(9, ExitReason::Succeeded))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }
}
