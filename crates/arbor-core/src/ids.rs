//! Identifiers shared across Arbor crates.
//!
//! Task and job identifiers are opaque tokens. Allocation identifiers are
//! structured: a task identity plus a monotonically increasing specifier, so
//! resuming a task never has to recover the specifier from a formatted string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique identifier for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

macro_rules! opaque_id {
    ($ty:ident) => {
        impl $ty {
            /// Mint a fresh random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $ty {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $ty {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

opaque_id!(TaskId);
opaque_id!(JobId);

/// One concrete resource-allocation attempt for a task.
///
/// The first allocation of a task uses specifier 1; every resume bumps it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationId {
    pub task_id: TaskId,
    pub specifier: u32,
}

impl AllocationId {
    pub fn new(task_id: TaskId, specifier: u32) -> Self {
        Self { task_id, specifier }
    }

    /// The allocation a freshly created task starts with.
    pub fn first(task_id: TaskId) -> Self {
        Self::new(task_id, 1)
    }

    /// The allocation that follows this one when the task is resumed.
    pub fn next(&self) -> Self {
        Self::new(self.task_id.clone(), self.specifier + 1)
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.task_id, self.specifier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid allocation id {0:?}: expected <task-id>.<specifier>")]
pub struct ParseAllocationIdError(String);

impl FromStr for AllocationId {
    type Err = ParseAllocationIdError;

    /// Splits on the last `.` so task ids containing dots still parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseAllocationIdError(s.to_string());
        let (task, specifier) = s.rsplit_once('.').ok_or_else(err)?;
        if task.is_empty() {
            return Err(err());
        }
        let specifier: u32 = specifier.parse().map_err(|_| err())?;
        if specifier == 0 {
            return Err(err());
        }
        Ok(Self::new(TaskId::from(task), specifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(TaskId::generate(), TaskId::generate());
        assert_ne!(JobId::generate(), JobId::generate());
    }

    #[test]
    fn allocation_id_display_and_parse() {
        let id = AllocationId::new(TaskId::from("task-a"), 3);
        assert_eq!(id.to_string(), "task-a.3");
        assert_eq!("task-a.3".parse::<AllocationId>().unwrap(), id);
    }

    #[test]
    fn allocation_id_parse_uses_last_dot() {
        let id: AllocationId = "v1.task.12".parse().unwrap();
        assert_eq!(id.task_id.as_str(), "v1.task");
        assert_eq!(id.specifier, 12);
    }

    #[test]
    fn allocation_id_parse_rejects_garbage() {
        assert!("no-specifier".parse::<AllocationId>().is_err());
        assert!("task.x".parse::<AllocationId>().is_err());
        assert!(".4".parse::<AllocationId>().is_err());
        assert!("task.0".parse::<AllocationId>().is_err());
    }

    #[test]
    fn next_increments_specifier() {
        let first = AllocationId::first(TaskId::from("t"));
        assert_eq!(first.specifier, 1);
        let second = first.next();
        assert_eq!(second.specifier, 2);
        assert_eq!(second.task_id, first.task_id);
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&TaskId::from("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }
}
