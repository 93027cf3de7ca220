//! State propagation over a task's subtree.

use tracing::debug;

use arbor_core::TaskId;
use arbor_state::{StateResult, StateStore, TaskState};

use crate::error::{SchedulerError, SchedulerResult, StoreContext};
use crate::forest::TaskForest;

/// Set `new_state` on `root` and every task below it, except tasks whose
/// current state is in `override_states`.
///
/// The subtree is walked without pruning: a task below an overridden node
/// is still updated unless it is overridden itself. The subtree is read and
/// written inside one store transaction, so a task attached concurrently is
/// either fully seen or not at all. Returns the number of tasks changed.
pub fn propagate_task_state(
    store: &StateStore,
    root: &TaskId,
    new_state: TaskState,
    override_states: &[TaskState],
) -> SchedulerResult<usize> {
    let outcome = store
        .run_in_tx(|tx| -> StateResult<Option<(usize, usize)>> {
            let forest = TaskForest::from_tasks(tx.list_tasks()?);
            if forest.get(root).is_none() {
                return Ok(None);
            }
            let subtree: Vec<TaskId> = forest
                .descendants(root)
                .into_iter()
                .map(|task| task.task_id.clone())
                .collect();
            let changed = tx.set_task_states(&subtree, new_state, override_states)?;
            Ok(Some((subtree.len(), changed)))
        })
        .for_id(root)?;

    let Some((subtree, changed)) = outcome else {
        return Err(SchedulerError::TaskNotFound(root.clone()));
    };
    debug!(%root, %new_state, subtree, changed, "propagated task state");
    Ok(changed)
}
