//! Task service: create, kill, pause, and unpause generic tasks.
//!
//! Every operation authorizes the caller, validates the task's state, writes
//! the new state across the task's subtree, and then walks the eligible
//! tasks one by one asking the resource manager to stop or start them.
//! That walk stops at the first failure; work already issued is not undone.

use std::sync::Arc;

use tracing::{debug, info};

use arbor_core::config::DefaultsConfig;
use arbor_core::{merge, AllocationId, ConfigMap, GenericTaskConfig, JobId, TaskId};
use arbor_state::{
    ContextFile, GenericTaskSpec, Job, JobType, StateResult, StateStore, Task, TaskState,
    TaskType,
};

use crate::allocation::{epoch_secs, next_allocation_id, AllocationLauncher};
use crate::authz::{Action, Authorizer, User};
use crate::error::{SchedulerError, SchedulerResult, StoreContext};
use crate::forest::TaskForest;
use crate::priority::PriorityRegistry;
use crate::propagate::propagate_task_state;
use crate::rm::{ResourceManager, SignalKind};

/// States kill leaves alone, and never descends past.
pub const KILL_OVERRIDES: [TaskState; 2] = [TaskState::Canceled, TaskState::Completed];

/// States pause rejects, leaves alone, and never descends past.
pub const PAUSE_OVERRIDES: [TaskState; 7] = [
    TaskState::Canceled,
    TaskState::Completed,
    TaskState::Paused,
    TaskState::Error,
    TaskState::StoppingError,
    TaskState::StoppingCanceled,
    TaskState::StoppingCompleted,
];

/// States unpause never resumes or descends past.
pub const UNPAUSE_OVERRIDES: [TaskState; 6] = [
    TaskState::Canceled,
    TaskState::Completed,
    TaskState::Error,
    TaskState::StoppingError,
    TaskState::StoppingCanceled,
    TaskState::StoppingCompleted,
];

const UNPAUSABLE_FROM: [TaskState; 2] = [TaskState::Paused, TaskState::StoppingPaused];

/// Scope used for create checks when the request names no project.
const DEFAULT_SCOPE: &str = "default";

/// Input to [`TaskService::create_generic_task`].
#[derive(Debug, Clone, Default)]
pub struct CreateTaskRequest {
    /// Launch config. Merged over the forked task's config when both are set.
    pub config: Option<ConfigMap>,
    pub forked_from: Option<TaskId>,
    pub parent_id: Option<TaskId>,
    pub no_pause: Option<bool>,
    pub context_directory: Vec<ContextFile>,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedTask {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub allocation_id: AllocationId,
}

/// Orchestrates the generic task lifecycle.
#[derive(Clone)]
pub struct TaskService {
    store: StateStore,
    rm: Arc<dyn ResourceManager>,
    authz: Arc<dyn Authorizer>,
    priorities: Arc<PriorityRegistry>,
    defaults: DefaultsConfig,
    launcher: AllocationLauncher,
}

impl TaskService {
    pub fn new(
        store: StateStore,
        rm: Arc<dyn ResourceManager>,
        authz: Arc<dyn Authorizer>,
        priorities: Arc<PriorityRegistry>,
        defaults: DefaultsConfig,
    ) -> Self {
        let launcher = AllocationLauncher::new(
            store.clone(),
            Arc::clone(&rm),
            Arc::clone(&priorities),
            defaults.preemptible,
        );
        Self {
            store,
            rm,
            authz,
            priorities,
            defaults,
            launcher,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    // ── Create ─────────────────────────────────────────────────────

    /// Admit a new generic task and start its first allocation.
    pub async fn create_generic_task(
        &self,
        user: &User,
        request: CreateTaskRequest,
    ) -> SchedulerResult<CreatedTask> {
        let scope = request.project_id.as_deref().unwrap_or(DEFAULT_SCOPE);
        self.authz
            .can_perform(user, Action::CreateTask, scope)
            .await
            .map_err(|e| SchedulerError::PermissionDenied(e.to_string()))?;

        // Resolve the launch config from the request and the fork source.
        let config_map = match (&request.config, &request.forked_from) {
            (None, None) => {
                return Err(SchedulerError::InvalidArgument(
                    "No config file nor forked task provided".to_string(),
                ));
            }
            (Some(config), None) => config.clone(),
            (overrides, Some(fork_id)) => {
                let base = self.forked_config(user, fork_id).await?;
                match overrides {
                    Some(overrides) => merge(&base, overrides),
                    None => base,
                }
            }
        };

        if let Some(parent_id) = &request.parent_id {
            self.store
                .get_task(parent_id)
                .for_id(parent_id)?
                .ok_or_else(|| SchedulerError::TaskNotFound(parent_id.clone()))?;
        }

        let config = GenericTaskConfig::from_map(&config_map)
            .map_err(|e| SchedulerError::InvalidArgument(format!("malformed task config: {e}")))?;
        self.validate_config(&config, &request.context_directory)?;

        let task_id = TaskId::generate();
        let job_id = JobId::generate();
        let now = epoch_secs();
        let serialized = serde_json::to_string(&config_map).map_err(|e| SchedulerError::Config {
            id: task_id.to_string(),
            message: e.to_string(),
        })?;

        let job = Job {
            job_id: job_id.clone(),
            job_type: JobType::Generic,
            owner_id: user.id.clone(),
            priority: config.resources.priority,
        };
        let task = Task {
            task_id: task_id.clone(),
            task_type: TaskType::Generic,
            job_id: job_id.clone(),
            parent_id: request.parent_id.clone(),
            state: TaskState::Active,
            no_pause: request.no_pause,
            start_time: now,
            end_time: None,
            forked_from: request.forked_from.clone(),
            config: Some(serialized),
        };

        // Job, task, and context directory land together or not at all.
        self.store
            .run_in_tx(|tx| -> StateResult<()> {
                tx.add_job(&job)?;
                tx.add_task(&task)?;
                if !request.context_directory.is_empty() {
                    tx.put_context_directory(&task_id, &request.context_directory)?;
                }
                Ok(())
            })
            .for_id(&task_id)?;

        let spec = GenericTaskSpec {
            task_id: task_id.clone(),
            job_id: job_id.clone(),
            owner_id: user.id.clone(),
            project_id: request.project_id.clone(),
            resource_pool: config.resource_pool_or(&self.defaults.resource_pool).to_string(),
            config,
        };
        let allocation_id = next_allocation_id(&task_id, None);
        self.launcher.start(&spec, allocation_id.clone()).await?;

        info!(
            %task_id,
            %job_id,
            user = %user.username,
            parent_id = ?request.parent_id,
            "generic task created"
        );
        Ok(CreatedTask {
            task_id,
            job_id,
            allocation_id,
        })
    }

    async fn forked_config(&self, user: &User, fork_id: &TaskId) -> SchedulerResult<ConfigMap> {
        let forked = self.authorize_task(user, fork_id, Action::ViewTask).await?;
        let Some(raw) = forked.config.as_deref() else {
            return Ok(ConfigMap::new());
        };
        serde_json::from_str(raw).map_err(|e| SchedulerError::Config {
            id: fork_id.to_string(),
            message: e.to_string(),
        })
    }

    fn validate_config(
        &self,
        config: &GenericTaskConfig,
        context_directory: &[ContextFile],
    ) -> SchedulerResult<()> {
        if !context_directory.is_empty() && config.work_dir.is_some() {
            return Err(SchedulerError::InvalidArgument(
                "work_dir cannot be set together with a context directory".to_string(),
            ));
        }
        let slots = config.resources.slots;
        if slots == 0 {
            return Err(SchedulerError::InvalidArgument(
                "resources.slots must be at least 1".to_string(),
            ));
        }
        if let Some(max) = self.defaults.max_slots {
            if slots > max {
                return Err(SchedulerError::InvalidArgument(format!(
                    "resources.slots {slots} exceeds the limit of {max}"
                )));
            }
        }
        Ok(())
    }

    // ── Kill ───────────────────────────────────────────────────────

    /// Kill a task and everything below it, or its whole tree when
    /// `kill_from_root` is set.
    pub async fn kill_generic_task(
        &self,
        user: &User,
        task_id: &TaskId,
        kill_from_root: bool,
    ) -> SchedulerResult<()> {
        let task = self.authorize_task(user, task_id, Action::KillTask).await?;
        ensure_generic(&task)?;

        let forest = TaskForest::load(&self.store).for_id(task_id)?;
        let target = if kill_from_root {
            forest
                .find_root(task_id)
                .cloned()
                .ok_or_else(|| SchedulerError::TaskNotFound(task_id.clone()))?
        } else {
            task_id.clone()
        };
        let target_state = forest
            .get(&target)
            .map(|t| t.state)
            .ok_or_else(|| SchedulerError::TaskNotFound(target.clone()))?;
        if KILL_OVERRIDES.contains(&target_state) {
            return Err(SchedulerError::InvalidState {
                task_id: target,
                state: target_state,
                action: "kill",
            });
        }

        propagate_task_state(&self.store, &target, TaskState::StoppingCanceled, &KILL_OVERRIDES)?;

        let forest = TaskForest::load(&self.store).for_id(&target)?;
        for child in forest.children(&target, &KILL_OVERRIDES) {
            if child.state == TaskState::Canceled {
                continue;
            }
            self.stop_allocation(child, SignalKind::Kill, "task killed by user")
                .await?;
        }

        info!(%task_id, %target, kill_from_root, "generic task killed");
        Ok(())
    }

    // ── Pause ──────────────────────────────────────────────────────

    /// Pause a task. Descendants follow in state; only those explicitly
    /// marked pausable are signaled.
    pub async fn pause_generic_task(&self, user: &User, task_id: &TaskId) -> SchedulerResult<()> {
        let task = self.authorize_task(user, task_id, Action::PauseTask).await?;
        ensure_generic(&task)?;

        if PAUSE_OVERRIDES.contains(&task.state) {
            return Err(SchedulerError::InvalidState {
                task_id: task_id.clone(),
                state: task.state,
                action: "pause",
            });
        }
        if task.no_pause == Some(true) {
            return Err(SchedulerError::NotPausable(task_id.clone()));
        }

        propagate_task_state(&self.store, task_id, TaskState::StoppingPaused, &PAUSE_OVERRIDES)?;

        let forest = TaskForest::load(&self.store).for_id(task_id)?;
        for child in forest.children(task_id, &PAUSE_OVERRIDES) {
            // Below the target only tasks marked pausable get a signal.
            if child.task_id != *task_id && child.no_pause != Some(false) {
                debug!(task_id = %child.task_id, "not pausable; skipping signal");
                continue;
            }
            self.stop_allocation(child, SignalKind::Terminate, "task paused by user")
                .await?;
        }

        info!(%task_id, "generic task paused");
        Ok(())
    }

    // ── Unpause ────────────────────────────────────────────────────

    /// Resume a paused task and its resumable descendants, each on a new
    /// allocation.
    pub async fn unpause_generic_task(&self, user: &User, task_id: &TaskId) -> SchedulerResult<()> {
        let task = self.authorize_task(user, task_id, Action::UnpauseTask).await?;
        ensure_generic(&task)?;

        if !UNPAUSABLE_FROM.contains(&task.state) {
            return Err(SchedulerError::InvalidState {
                task_id: task_id.clone(),
                state: task.state,
                action: "unpause",
            });
        }

        let forest = TaskForest::load(&self.store).for_id(task_id)?;
        for child in forest.children(task_id, &UNPAUSE_OVERRIDES) {
            self.resume(&child.task_id).await?;
        }

        info!(%task_id, "generic task unpaused");
        Ok(())
    }

    async fn resume(&self, task_id: &TaskId) -> SchedulerResult<()> {
        let mut snapshot = self
            .store
            .get_spec_snapshot(task_id)
            .for_id(task_id)?
            .ok_or_else(|| SchedulerError::SnapshotNotFound(task_id.clone()))?;

        // The job record holds the priority even when the change was made
        // with no callback registered, e.g. after a restart.
        let job_id = snapshot.spec.job_id.clone();
        if let Some(priority) = self
            .store
            .get_job(&job_id)
            .for_id(&job_id)?
            .and_then(|job| job.priority)
        {
            snapshot.spec.config.resources.priority = Some(priority);
        }

        // Bump past whichever is newer: the snapshot or the allocation table.
        let latest = match self.store.latest_allocation(task_id).for_id(task_id)? {
            Some(a) if a.allocation_id.specifier > snapshot.allocation_id.specifier => {
                a.allocation_id
            }
            _ => snapshot.allocation_id,
        };
        let allocation_id = next_allocation_id(task_id, Some(&latest));

        self.launcher.start(&snapshot.spec, allocation_id.clone()).await?;
        self.store.mark_task_running(task_id).for_id(task_id)?;

        info!(%task_id, %allocation_id, "task resumed");
        Ok(())
    }

    /// Ask the resource manager to stop `task`'s current allocation. A task
    /// whose allocation already ended is settled in place.
    async fn stop_allocation(
        &self,
        task: &Task,
        kind: SignalKind,
        reason: &str,
    ) -> SchedulerResult<()> {
        let latest = self
            .store
            .latest_allocation(&task.task_id)
            .for_id(&task.task_id)?;

        match latest {
            Some(allocation) if allocation.is_running() => {
                self.rm
                    .signal(&allocation.allocation_id, kind, reason)
                    .await
                    .map_err(|e| SchedulerError::ResourceManager {
                        id: allocation.allocation_id.to_string(),
                        message: e.to_string(),
                    })?;
                debug!(task_id = %task.task_id, allocation_id = %allocation.allocation_id, %kind, "allocation signaled");
            }
            _ => {
                let state = match kind {
                    SignalKind::Kill => TaskState::Canceled,
                    SignalKind::Terminate => TaskState::Paused,
                };
                self.store
                    .finish_task(&task.task_id, state, epoch_secs())
                    .for_id(&task.task_id)?;
                if state.is_terminal() {
                    self.priorities.remove(&task.job_id);
                }
                debug!(task_id = %task.task_id, %state, "no live allocation; settled directly");
            }
        }
        Ok(())
    }

    // ── Priority ───────────────────────────────────────────────────

    /// Change a job's priority. Goes through the job's registered callback
    /// when there is one, otherwise straight to the job record.
    pub async fn set_job_priority(
        &self,
        user: &User,
        job_id: &JobId,
        priority: i32,
    ) -> SchedulerResult<()> {
        self.store
            .get_job(job_id)
            .for_id(job_id)?
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.clone()))?;
        self.authz
            .can_perform(user, Action::EditPriority, job_id.as_str())
            .await
            .map_err(|e| SchedulerError::PermissionDenied(e.to_string()))?;

        let applied = self.priorities.apply(job_id, priority)?;
        if !applied {
            self.store
                .set_job_priority(job_id, priority)
                .for_id(job_id)?;
        }

        info!(%job_id, priority, via_callback = applied, "job priority changed");
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────────

    pub async fn get_task(&self, user: &User, task_id: &TaskId) -> SchedulerResult<Task> {
        self.authorize_task(user, task_id, Action::ViewTask).await
    }

    /// Every task in the tree containing `task_id`, root first.
    pub async fn task_tree(&self, user: &User, task_id: &TaskId) -> SchedulerResult<Vec<Task>> {
        self.authorize_task(user, task_id, Action::ViewTask).await?;
        let forest = TaskForest::load(&self.store).for_id(task_id)?;
        let root = forest
            .find_root(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.clone()))?;
        Ok(forest.descendants(root).into_iter().cloned().collect())
    }

    /// Load `task_id` and check that `user` may see it and perform `action`
    /// on it. A task the user may not see is reported as missing.
    async fn authorize_task(
        &self,
        user: &User,
        task_id: &TaskId,
        action: Action,
    ) -> SchedulerResult<Task> {
        let task = self
            .store
            .get_task(task_id)
            .for_id(task_id)?
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.clone()))?;

        if self
            .authz
            .can_perform(user, Action::ViewTask, task_id.as_str())
            .await
            .is_err()
        {
            return Err(SchedulerError::TaskNotFound(task_id.clone()));
        }
        if action != Action::ViewTask {
            self.authz
                .can_perform(user, action, task_id.as_str())
                .await
                .map_err(|e| SchedulerError::PermissionDenied(e.to_string()))?;
        }
        Ok(task)
    }
}

fn ensure_generic(task: &Task) -> SchedulerResult<()> {
    if task.task_type != TaskType::Generic {
        return Err(SchedulerError::InvalidArgument(format!(
            "task {} is not a generic task",
            task.task_id
        )));
    }
    Ok(())
}
