pub mod config;
pub mod task;

use std::sync::Arc;

use arbor_core::ArborConfig;
use arbor_scheduler::{AllowAll, PriorityRegistry, TaskService, User};
use arbor_state::StateStore;
use tracing::info;

use crate::local_rm::LocalResourceManager;

/// Everything a task command needs.
pub struct Context {
    pub service: TaskService,
    pub priorities: Arc<PriorityRegistry>,
    pub user: User,
}

impl Context {
    pub fn open(config: &ArborConfig, username: &str) -> anyhow::Result<Self> {
        let path = &config.store.path;
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let store = StateStore::open(path)?;
        info!(path = ?path, "task store opened");

        let priorities = PriorityRegistry::global();
        let service = TaskService::new(
            store,
            Arc::new(LocalResourceManager),
            Arc::new(AllowAll),
            Arc::clone(&priorities),
            config.defaults.clone(),
        );
        Ok(Self {
            service,
            priorities,
            user: User::new(username, username),
        })
    }
}
