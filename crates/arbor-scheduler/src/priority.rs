//! Priority-change registry.
//!
//! Maps a job to the callback that applies a live priority change to its
//! task. Entries are added when a task's allocation starts and stay until the
//! task reaches a terminal state, so a priority edit made while the task has
//! no live allocation (queued, or paused) is still applied.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::debug;

use arbor_core::JobId;

use crate::error::SchedulerResult;

pub type PriorityCallback = Arc<dyn Fn(i32) -> SchedulerResult<()> + Send + Sync>;

#[derive(Default)]
pub struct PriorityRegistry {
    entries: Mutex<HashMap<JobId, PriorityCallback>>,
}

static GLOBAL: OnceLock<Arc<PriorityRegistry>> = OnceLock::new();

impl PriorityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<PriorityRegistry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(PriorityRegistry::new())))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, PriorityCallback>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `callback` unless the job already has one. The check and the
    /// insert happen under one lock. Returns whether it was inserted.
    pub fn register_if_absent(&self, job_id: &JobId, callback: PriorityCallback) -> bool {
        match self.lock().entry(job_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(callback);
                debug!(%job_id, "priority callback registered");
                true
            }
        }
    }

    /// Run the job's callback with `priority`. Returns `Ok(false)` when the
    /// job has no callback. The lock is released before the callback runs.
    pub fn apply(&self, job_id: &JobId, priority: i32) -> SchedulerResult<bool> {
        let callback = self.lock().get(job_id).cloned();
        match callback {
            Some(callback) => {
                callback(priority)?;
                debug!(%job_id, priority, "priority change applied");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn remove(&self, job_id: &JobId) -> bool {
        self.lock().remove(job_id).is_some()
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.lock().contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for PriorityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityRegistry")
            .field("jobs", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerError;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn recording(seen: &Arc<AtomicI32>) -> PriorityCallback {
        let seen = Arc::clone(seen);
        Arc::new(move |priority| {
            seen.store(priority, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn first_registration_wins() {
        let registry = PriorityRegistry::new();
        let job = JobId::from("job-1");
        let first = Arc::new(AtomicI32::new(0));
        let second = Arc::new(AtomicI32::new(0));

        assert!(registry.register_if_absent(&job, recording(&first)));
        assert!(!registry.register_if_absent(&job, recording(&second)));

        assert!(registry.apply(&job, 42).unwrap());
        assert_eq!(first.load(Ordering::SeqCst), 42);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn apply_without_entry() {
        let registry = PriorityRegistry::new();
        assert!(!registry.apply(&JobId::from("nope"), 1).unwrap());
    }

    #[test]
    fn apply_surfaces_callback_error() {
        let registry = PriorityRegistry::new();
        let job = JobId::from("job-1");
        registry.register_if_absent(
            &job,
            Arc::new(|_| Err(SchedulerError::InvalidArgument("bad priority".into()))),
        );
        assert!(registry.apply(&job, 5).is_err());
    }

    #[test]
    fn remove_entry() {
        let registry = PriorityRegistry::new();
        let job = JobId::from("job-1");
        registry.register_if_absent(&job, Arc::new(|_| Ok(())));
        assert!(registry.contains(&job));
        assert!(registry.remove(&job));
        assert!(!registry.remove(&job));
        assert!(registry.is_empty());
    }

    #[test]
    fn callback_may_reenter_registry() {
        let registry = Arc::new(PriorityRegistry::new());
        let job = JobId::from("job-1");
        let inner = Arc::clone(&registry);
        let inner_job = job.clone();
        registry.register_if_absent(
            &job,
            Arc::new(move |_| {
                assert!(inner.contains(&inner_job));
                Ok(())
            }),
        );
        assert!(registry.apply(&job, 3).unwrap());
    }

    #[test]
    fn concurrent_registration_inserts_once() {
        let registry = Arc::new(PriorityRegistry::new());
        let job = JobId::from("job-1");
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let job = job.clone();
                std::thread::spawn(move || registry.register_if_absent(&job, Arc::new(|_| Ok(()))))
            })
            .collect();

        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|inserted| *inserted)
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn global_is_shared() {
        let a = PriorityRegistry::global();
        let b = PriorityRegistry::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
