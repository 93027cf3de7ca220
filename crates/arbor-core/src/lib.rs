pub mod config;
pub mod ids;
pub mod task_config;

pub use config::ArborConfig;
pub use ids::{AllocationId, JobId, ParseAllocationIdError, TaskId};
pub use task_config::{merge, ConfigMap, GenericTaskConfig, TaskResources};
