//! Contracts for the remote identity and data service.
//!
//! The crate never stores tasks or sessions itself. It talks to a gateway
//! that validates credentials and performs owner-scoped CRUD on task rows.
//! Two traits split those concerns:
//!
//! - [`AuthGateway`] validates (and possibly renews) a session credential.
//! - [`TaskGateway`] is a caller-scoped task store. Implementations enforce
//!   ownership on every call; a row owned by someone else is reported as
//!   [`Error::ConflictOrNotFound`](crate::Error::ConflictOrNotFound), never as
//!   "exists but forbidden".
//!
//! [`memory::InMemoryGateway`] implements both for development and tests.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::gate::Credential;
use crate::types::{NewTask, Task, TaskId, TaskPatch, UserId};

pub use memory::{FaultPlan, GatewayOperation, InMemoryGateway, ScopedTasks, SessionPolicy};

/// Result of validating a credential.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionValidation {
    /// The authenticated user, or `None` if the credential is not valid.
    pub identity: Option<UserId>,
    /// A renewed credential the client must store in place of the old one.
    pub refreshed: Option<Credential>,
}

impl SessionValidation {
    /// Valid session, no renewal.
    pub fn valid(identity: UserId) -> Self {
        Self {
            identity: Some(identity),
            refreshed: None,
        }
    }

    /// Valid session with a renewed credential.
    pub fn renewed(identity: UserId, refreshed: Credential) -> Self {
        Self {
            identity: Some(identity),
            refreshed: Some(refreshed),
        }
    }

    /// The credential was rejected.
    pub fn rejected() -> Self {
        Self::default()
    }
}

/// Validates session credentials.
///
/// An `Err` means the gateway could not answer (network, timeout). A
/// definitive "not signed in" is `Ok` with no identity.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// Validates `credential`, renewing it if it is close to expiry.
    async fn validate_session(&self, credential: &Credential) -> Result<SessionValidation>;
}

/// Owner-scoped task persistence.
///
/// Implementations are bound to one caller identity. The server assigns ids
/// and timestamps.
#[async_trait]
pub trait TaskGateway: Send + Sync {
    /// Lists the caller's tasks, newest first.
    async fn list_tasks(&self, owner: &UserId) -> Result<Vec<Task>>;

    /// Creates a task owned by the caller.
    async fn create_task(&self, task: NewTask) -> Result<Task>;

    /// Applies `patch` to one of the caller's tasks.
    async fn update_task(&self, id: TaskId, patch: TaskPatch) -> Result<Task>;

    /// Deletes one of the caller's tasks.
    async fn delete_task(&self, id: TaskId) -> Result<()>;
}
