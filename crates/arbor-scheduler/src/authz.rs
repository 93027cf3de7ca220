//! Authorization gate.
//!
//! Every orchestration call asks the authorizer first. Callers who may not
//! view a task are told it does not exist; callers who may view it but not
//! act on it get a permission error.

use async_trait::async_trait;
use thiserror::Error;

/// The caller of an orchestration operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
}

impl User {
    pub fn new(id: &str, username: &str) -> Self {
        Self {
            id: id.to_string(),
            username: username.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateTask,
    ViewTask,
    KillTask,
    PauseTask,
    UnpauseTask,
    EditPriority,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Action::CreateTask => "create task",
            Action::ViewTask => "view task",
            Action::KillTask => "kill task",
            Action::PauseTask => "pause task",
            Action::UnpauseTask => "unpause task",
            Action::EditPriority => "edit priority",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{user} may not {action} on {scope}")]
pub struct AuthzError {
    pub user: String,
    pub action: Action,
    pub scope: String,
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Succeeds when `user` may perform `action` within `scope`.
    async fn can_perform(&self, user: &User, action: Action, scope: &str) -> Result<(), AuthzError>;
}

/// Permits everything. Used by single-operator deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn can_perform(&self, _user: &User, _action: Action, _scope: &str) -> Result<(), AuthzError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_permits() {
        let user = User::new("1", "alice");
        for action in [Action::CreateTask, Action::KillTask, Action::EditPriority] {
            assert!(AllowAll.can_perform(&user, action, "task-1").await.is_ok());
        }
    }

    #[test]
    fn user_carries_id_and_name() {
        let user = User::new("7", "carol");
        assert_eq!(user, User { id: "7".to_string(), username: "carol".to_string() });
    }

    #[test]
    fn error_display() {
        let err = AuthzError {
            user: "bob".to_string(),
            action: Action::PauseTask,
            scope: "task-9".to_string(),
        };
        assert_eq!(err.to_string(), "bob may not pause task on task-9");
    }
}
