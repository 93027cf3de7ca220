//! StateStore — redb-backed persistence for Arbor.
//!
//! Provides typed operations over tasks, jobs, allocations, task-spec
//! snapshots, and context directories. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{
    Database, ReadableDatabase, ReadableTable, TableDefinition, TableHandle, WriteTransaction,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use arbor_core::{AllocationId, JobId, TaskId};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Thread-safe task store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

/// Handle to an open write transaction, passed to [`StateStore::run_in_tx`].
pub struct StoreTx<'a> {
    txn: &'a WriteTransaction,
}

impl StoreTx<'_> {
    /// Insert a new job. Fails if the job id is taken.
    pub fn add_job(&self, job: &Job) -> StateResult<()> {
        self.insert_new(JOBS, job.job_id.as_str(), job)
    }

    /// Insert a new task. Fails if the task id is taken.
    pub fn add_task(&self, task: &Task) -> StateResult<()> {
        self.insert_new(TASKS, task.task_id.as_str(), task)
    }

    /// Persist the context directory shipped with a task.
    pub fn put_context_directory(&self, task_id: &TaskId, files: &[ContextFile]) -> StateResult<()> {
        let value = encode(&files)?;
        let mut table = self.txn.open_table(CONTEXT_DIRECTORIES).map_err(map_err!(Table))?;
        table
            .insert(task_id.as_str(), value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    /// List all tasks as seen by this transaction.
    pub fn list_tasks(&self) -> StateResult<Vec<Task>> {
        let table = self.txn.open_table(TASKS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Set `new_state` on every listed task whose current state is not in
    /// `keep_states`. Returns the number of tasks changed. A missing task
    /// fails the whole update.
    pub fn set_task_states(
        &self,
        task_ids: &[TaskId],
        new_state: TaskState,
        keep_states: &[TaskState],
    ) -> StateResult<usize> {
        let mut table = self.txn.open_table(TASKS).map_err(map_err!(Table))?;
        let mut changed = 0;
        for task_id in task_ids {
            let current = table
                .get(task_id.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| StateError::NotFound(format!("tasks/{task_id}")))?;
            let mut task: Task = decode(&current)?;
            if keep_states.contains(&task.state) {
                continue;
            }
            task.state = new_state;
            let bytes = encode(&task)?;
            table
                .insert(task_id.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
            changed += 1;
        }
        debug!(%new_state, requested = task_ids.len(), changed, "bulk task state update");
        Ok(changed)
    }

    fn insert_new<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let value = encode(value)?;
        let mut table = self.txn.open_table(def).map_err(map_err!(Table))?;
        if table.get(key).map_err(map_err!(Read))?.is_some() {
            return Err(StateError::AlreadyExists(format!("{}/{key}", def.name())));
        }
        table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        Ok(())
    }
}

impl StateStore {
    /// Open (or create) a persistent task store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "task store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory task store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory task store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(TASKS).map_err(map_err!(Table))?;
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        txn.open_table(TASK_SPEC_SNAPSHOTS).map_err(map_err!(Table))?;
        txn.open_table(CONTEXT_DIRECTORIES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `f` inside a single write transaction.
    ///
    /// Everything `f` writes is committed together if it returns `Ok`, and
    /// discarded if it returns `Err`.
    pub fn run_in_tx<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, E>,
        E: From<StateError>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome = f(&StoreTx { txn: &txn });
        match outcome {
            Ok(value) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort) = txn.abort() {
                    warn!(error = %abort, "failed to abort write transaction");
                }
                Err(err)
            }
        }
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let value = encode(value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Read-modify-write a single row inside one write transaction.
    fn modify_json<T, F>(&self, def: JsonTable, key: &str, f: F) -> StateResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let current = table
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| StateError::NotFound(format!("{}/{key}", def.name())))?;
            let mut value: T = decode(&current)?;
            f(&mut value);
            let bytes = encode(&value)?;
            table.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
            value
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    // ── Tasks ──────────────────────────────────────────────────────

    /// Get a task by ID.
    pub fn get_task(&self, task_id: &TaskId) -> StateResult<Option<Task>> {
        self.get_json(TASKS, task_id.as_str())
    }

    /// List all tasks.
    pub fn list_tasks(&self) -> StateResult<Vec<Task>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TASKS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Set a task's state.
    pub fn update_task_state(&self, task_id: &TaskId, state: TaskState) -> StateResult<Task> {
        let task = self.modify_json(TASKS, task_id.as_str(), |task: &mut Task| {
            task.state = state;
        })?;
        debug!(%task_id, %state, "task state updated");
        Ok(task)
    }

    /// Mark a task as running again: `Active`, no end time.
    pub fn mark_task_running(&self, task_id: &TaskId) -> StateResult<Task> {
        let task = self.modify_json(TASKS, task_id.as_str(), |task: &mut Task| {
            task.state = TaskState::Active;
            task.end_time = None;
        })?;
        debug!(%task_id, "task marked running");
        Ok(task)
    }

    /// Record that a task stopped running, leaving it in `state`.
    pub fn finish_task(&self, task_id: &TaskId, state: TaskState, end_time: u64) -> StateResult<Task> {
        let task = self.modify_json(TASKS, task_id.as_str(), |task: &mut Task| {
            task.state = state;
            task.end_time = Some(end_time);
        })?;
        debug!(%task_id, %state, end_time, "task finished");
        Ok(task)
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Get a job by ID.
    pub fn get_job(&self, job_id: &JobId) -> StateResult<Option<Job>> {
        self.get_json(JOBS, job_id.as_str())
    }

    /// Persist a job's scheduling priority.
    pub fn set_job_priority(&self, job_id: &JobId, priority: i32) -> StateResult<Job> {
        let job = self.modify_json(JOBS, job_id.as_str(), |job: &mut Job| {
            job.priority = Some(priority);
        })?;
        debug!(%job_id, priority, "job priority stored");
        Ok(job)
    }

    // ── Allocations ────────────────────────────────────────────────

    /// Insert or update an allocation.
    pub fn put_allocation(&self, allocation: &Allocation) -> StateResult<()> {
        let key = allocation.allocation_id.to_string();
        self.put_json(ALLOCATIONS, &key, allocation)?;
        debug!(allocation_id = %key, "allocation stored");
        Ok(())
    }

    /// Get an allocation by ID.
    pub fn get_allocation(&self, allocation_id: &AllocationId) -> StateResult<Option<Allocation>> {
        self.get_json(ALLOCATIONS, &allocation_id.to_string())
    }

    /// List every allocation a task has owned.
    pub fn list_allocations_for_task(&self, task_id: &TaskId) -> StateResult<Vec<Allocation>> {
        let prefix = format!("{task_id}.");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let allocation: Allocation = decode(value.value())?;
            // A task id that is itself a prefix of another task id can match.
            if allocation.task_id() == task_id {
                results.push(allocation);
            }
        }
        Ok(results)
    }

    /// The task's current allocation: the one with the latest start time,
    /// ties broken by specifier.
    pub fn latest_allocation(&self, task_id: &TaskId) -> StateResult<Option<Allocation>> {
        let allocations = self.list_allocations_for_task(task_id)?;
        Ok(allocations
            .into_iter()
            .max_by_key(|a| (a.start_time, a.allocation_id.specifier)))
    }

    /// Persist the end of an allocation's lifetime.
    pub fn complete_allocation(&self, allocation_id: &AllocationId, end_time: u64) -> StateResult<Allocation> {
        let key = allocation_id.to_string();
        let allocation = self.modify_json(ALLOCATIONS, &key, |a: &mut Allocation| {
            if a.start_time.is_none() {
                a.start_time = Some(end_time);
            }
            a.end_time = Some(end_time);
        })?;
        debug!(allocation_id = %key, end_time, "allocation completed");
        Ok(allocation)
    }

    // ── Task spec snapshots ────────────────────────────────────────

    /// Create or replace the snapshot for a task.
    pub fn upsert_spec_snapshot(&self, snapshot: &TaskSpecSnapshot) -> StateResult<()> {
        self.put_json(TASK_SPEC_SNAPSHOTS, snapshot.task_id.as_str(), snapshot)?;
        debug!(
            task_id = %snapshot.task_id,
            allocation_id = %snapshot.allocation_id,
            "task spec snapshot stored"
        );
        Ok(())
    }

    /// Get the snapshot for a task.
    pub fn get_spec_snapshot(&self, task_id: &TaskId) -> StateResult<Option<TaskSpecSnapshot>> {
        self.get_json(TASK_SPEC_SNAPSHOTS, task_id.as_str())
    }

    /// Read-modify-write a task's snapshot.
    pub fn update_spec_snapshot<F>(&self, task_id: &TaskId, f: F) -> StateResult<TaskSpecSnapshot>
    where
        F: FnOnce(&mut TaskSpecSnapshot),
    {
        self.modify_json(TASK_SPEC_SNAPSHOTS, task_id.as_str(), f)
    }

    // ── Context directories ────────────────────────────────────────

    /// Get the context directory stored with a task.
    pub fn get_context_directory(&self, task_id: &TaskId) -> StateResult<Option<Vec<ContextFile>>> {
        self.get_json(CONTEXT_DIRECTORIES, task_id.as_str())
    }
}
