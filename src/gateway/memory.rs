//! In-memory gateway for development and tests.
//!
//! [`InMemoryGateway`] keeps sessions and task rows in `DashMap`s and
//! implements [`AuthGateway`] directly. Task access goes through
//! [`InMemoryGateway::for_user`], which returns a [`ScopedTasks`] bound to one
//! caller, mirroring how a row-level-secured store only ever sees the
//! authenticated user's rows.
//!
//! # Security
//!
//! Every task operation checks the row owner against the scoped caller. On
//! mismatch the gateway returns [`Error::ConflictOrNotFound`], never revealing
//! that the row exists.
//!
//! # Fault injection
//!
//! [`FaultPlan`] lets tests queue failures, add latency, or hold an operation
//! until released, per [`GatewayOperation`].
//!
//! # Examples
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use taskgate::gateway::{AuthGateway, InMemoryGateway, TaskGateway};
//! use taskgate::types::{NewTask, UserId};
//!
//! let gateway = InMemoryGateway::new();
//! let credential = gateway.issue_session(UserId::new("alice"));
//!
//! let validation = gateway.validate_session(&credential).await.unwrap();
//! assert_eq!(validation.identity, Some(UserId::new("alice")));
//!
//! let tasks = gateway.for_user(UserId::new("alice"));
//! let task = tasks.create_task(NewTask::new("Write docs")).await.unwrap();
//! assert_eq!(task.owner_id, UserId::new("alice"));
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::{AuthGateway, SessionValidation, TaskGateway};
use crate::error::{Error, Result};
use crate::gate::Credential;
use crate::types::{NewTask, Task, TaskId, TaskPatch, UserId};

/// Gateway calls that faults can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOperation {
    /// [`AuthGateway::validate_session`].
    ValidateSession,
    /// [`TaskGateway::list_tasks`].
    ListTasks,
    /// [`TaskGateway::create_task`].
    CreateTask,
    /// [`TaskGateway::update_task`].
    UpdateTask,
    /// [`TaskGateway::delete_task`].
    DeleteTask,
}

#[derive(Debug, Default)]
struct FaultRule {
    failures: VecDeque<Error>,
    delay: Option<Duration>,
    hold: Option<Arc<Semaphore>>,
}

/// Scripted failures and latency for an [`InMemoryGateway`].
#[derive(Debug, Default)]
pub struct FaultPlan {
    rules: Mutex<HashMap<GatewayOperation, FaultRule>>,
}

impl FaultPlan {
    /// Fails the next call to `op` with `error`. Calls queue in order.
    pub fn fail_next(&self, op: GatewayOperation, error: Error) {
        self.rules
            .lock()
            .entry(op)
            .or_default()
            .failures
            .push_back(error);
    }

    /// Fails the next `times` calls to `op` with `error`.
    pub fn fail_times(&self, op: GatewayOperation, times: usize, error: Error) {
        let mut rules = self.rules.lock();
        let rule = rules.entry(op).or_default();
        rule.failures
            .extend(std::iter::repeat(error).take(times));
    }

    /// Delays every call to `op`.
    pub fn set_delay(&self, op: GatewayOperation, delay: Duration) {
        self.rules.lock().entry(op).or_default().delay = Some(delay);
    }

    /// Blocks calls to `op` until [`release`](Self::release) or
    /// [`resume`](Self::resume).
    pub fn hold(&self, op: GatewayOperation) {
        self.rules.lock().entry(op).or_default().hold = Some(Arc::new(Semaphore::new(0)));
    }

    /// Lets `count` held calls to `op` proceed.
    pub fn release(&self, op: GatewayOperation, count: usize) {
        if let Some(hold) = self.rules.lock().get(&op).and_then(|r| r.hold.clone()) {
            hold.add_permits(count);
        }
    }

    /// Removes the hold on `op` and lets every waiting call proceed.
    pub fn resume(&self, op: GatewayOperation) {
        if let Some(hold) = self.rules.lock().get_mut(&op).and_then(|r| r.hold.take()) {
            hold.close();
        }
    }

    /// Removes all scripted behaviour.
    pub fn clear(&self) {
        let mut rules = self.rules.lock();
        for rule in rules.values() {
            if let Some(hold) = &rule.hold {
                hold.close();
            }
        }
        rules.clear();
    }

    async fn before(&self, op: GatewayOperation) -> Result<()> {
        let (hold, delay, failure) = {
            let mut rules = self.rules.lock();
            match rules.get_mut(&op) {
                Some(rule) => (rule.hold.clone(), rule.delay, rule.failures.pop_front()),
                None => (None, None, None),
            }
        };
        if let Some(hold) = hold {
            // A closed semaphore means the hold was lifted.
            if let Ok(permit) = hold.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(error) => {
                tracing::debug!(?op, %error, "injected gateway failure");
                Err(error)
            },
            None => Ok(()),
        }
    }
}

/// Session lifetime rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// How long an issued credential is valid.
    pub lifetime: chrono::Duration,
    /// Sessions closer than this to expiry are renewed on validation.
    pub refresh_threshold: chrono::Duration,
    /// How long a renewed-away credential keeps resolving to its successor,
    /// so requests already in flight with it are not signed out.
    pub reuse_grace: chrono::Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            lifetime: chrono::Duration::hours(1),
            refresh_threshold: chrono::Duration::minutes(5),
            reuse_grace: chrono::Duration::seconds(30),
        }
    }
}

#[derive(Debug, Clone)]
struct SessionRecord {
    user: UserId,
    expires_at: chrono::DateTime<Utc>,
    /// Set once the credential has been rotated.
    successor: Option<Credential>,
}

#[derive(Debug, Clone)]
struct StoredTask {
    seq: u64,
    task: Task,
}

#[derive(Debug, Default)]
struct Shared {
    sessions: DashMap<String, SessionRecord>,
    tasks: DashMap<TaskId, StoredTask>,
    next_seq: AtomicU64,
    calls: DashMap<GatewayOperation, u64>,
    faults: FaultPlan,
    policy: Mutex<SessionPolicy>,
}

impl Shared {
    async fn enter(&self, op: GatewayOperation) -> Result<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        self.faults.before(op).await
    }
}

/// Development gateway holding sessions and tasks in memory.
///
/// Cloning is cheap; clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGateway {
    inner: Arc<Shared>,
}

impl InMemoryGateway {
    /// Creates an empty gateway with the default [`SessionPolicy`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the session policy.
    pub fn with_policy(self, policy: SessionPolicy) -> Self {
        *self.inner.policy.lock() = policy;
        self
    }

    /// Scripted faults for this gateway.
    pub fn faults(&self) -> &FaultPlan {
        &self.inner.faults
    }

    /// How many times `op` was invoked, including failed calls.
    pub fn call_count(&self, op: GatewayOperation) -> u64 {
        self.inner.calls.get(&op).map(|c| *c).unwrap_or(0)
    }

    /// Signs `user` in and returns their credential.
    pub fn issue_session(&self, user: impl Into<UserId>) -> Credential {
        let lifetime = self.inner.policy.lock().lifetime;
        self.insert_session(user.into(), lifetime)
    }

    /// Signs a credential out, along with any credential it replaced.
    pub fn revoke_session(&self, credential: &Credential) {
        self.inner.sessions.remove(credential.expose());
        self.inner
            .sessions
            .retain(|_, record| record.successor.as_ref() != Some(credential));
    }

    /// Marks a credential as already expired.
    pub fn expire_session(&self, credential: &Credential) {
        if let Some(mut record) = self.inner.sessions.get_mut(credential.expose()) {
            record.expires_at = Utc::now() - chrono::Duration::seconds(1);
        }
    }

    /// Number of live sessions. Credentials retired by renewal are not
    /// counted.
    pub fn session_count(&self) -> usize {
        self.inner
            .sessions
            .iter()
            .filter(|record| record.successor.is_none())
            .count()
    }

    /// Returns a task client bound to `user`.
    pub fn for_user(&self, user: impl Into<UserId>) -> ScopedTasks {
        ScopedTasks {
            inner: Arc::clone(&self.inner),
            user: user.into(),
        }
    }

    /// Inserts a task directly, bypassing faults.
    pub fn seed_task(&self, owner: impl Into<UserId>, task: NewTask) -> Result<Task> {
        let scoped = self.for_user(owner);
        scoped.insert(task)
    }

    /// Reads a task regardless of owner.
    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.inner.tasks.get(&id).map(|stored| stored.task.clone())
    }

    /// Total number of stored tasks.
    pub fn task_count(&self) -> usize {
        self.inner.tasks.len()
    }

    fn insert_session(&self, user: UserId, lifetime: chrono::Duration) -> Credential {
        let token = format!("tg_{}", Uuid::new_v4().simple());
        self.inner.sessions.insert(
            token.clone(),
            SessionRecord {
                user,
                expires_at: Utc::now() + lifetime,
                successor: None,
            },
        );
        Credential::new(token)
    }

    /// Issues a successor for `credential` and retires it for the reuse
    /// grace period. Concurrent rotations of one credential agree on a
    /// single successor.
    fn rotate(
        &self,
        credential: &Credential,
        user: &UserId,
        policy: &SessionPolicy,
        now: chrono::DateTime<Utc>,
    ) -> Credential {
        let candidate = self.insert_session(user.clone(), policy.lifetime);
        let winner = match self.inner.sessions.get_mut(credential.expose()) {
            Some(mut retired) => {
                let winner = retired.successor.get_or_insert_with(|| candidate.clone()).clone();
                retired.expires_at = retired.expires_at.min(now + policy.reuse_grace);
                winner
            },
            None => candidate.clone(),
        };
        if winner != candidate {
            self.inner.sessions.remove(candidate.expose());
        }
        winner
    }
}

#[async_trait]
impl AuthGateway for InMemoryGateway {
    async fn validate_session(&self, credential: &Credential) -> Result<SessionValidation> {
        self.inner.enter(GatewayOperation::ValidateSession).await?;

        let Some(record) = self
            .inner
            .sessions
            .get(credential.expose())
            .map(|r| r.clone())
        else {
            return Ok(SessionValidation::rejected());
        };

        let now = Utc::now();
        if record.expires_at <= now {
            self.inner.sessions.remove(credential.expose());
            tracing::debug!(user = %record.user, "session expired");
            return Ok(SessionValidation::rejected());
        }

        if let Some(successor) = record.successor {
            tracing::debug!(user = %record.user, "retired credential reused within grace period");
            return Ok(SessionValidation::renewed(record.user, successor));
        }

        let policy = *self.inner.policy.lock();
        if record.expires_at - now <= policy.refresh_threshold {
            let renewed = self.rotate(credential, &record.user, &policy, now);
            tracing::debug!(user = %record.user, "session renewed");
            return Ok(SessionValidation::renewed(record.user, renewed));
        }

        Ok(SessionValidation::valid(record.user))
    }
}

/// Task client bound to one user of an [`InMemoryGateway`].
#[derive(Debug, Clone)]
pub struct ScopedTasks {
    inner: Arc<Shared>,
    user: UserId,
}

impl ScopedTasks {
    /// The caller this client acts for.
    pub fn user(&self) -> &UserId {
        &self.user
    }

    fn insert(&self, task: NewTask) -> Result<Task> {
        let task = task.validated()?;
        let now = Utc::now();
        let row = Task {
            id: TaskId::generate(),
            owner_id: self.user.clone(),
            title: task.title,
            description: task.description,
            completed: task.completed,
            priority: task.priority,
            due_date: task.due_date,
            created_at: now,
            updated_at: now,
        };
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        self.inner.tasks.insert(
            row.id,
            StoredTask {
                seq,
                task: row.clone(),
            },
        );
        Ok(row)
    }

    fn owner_mismatch(&self, id: TaskId, owner: &UserId) -> Error {
        tracing::warn!(
            task_id = %id,
            owner = %owner,
            requested_by = %self.user,
            "task owner mismatch"
        );
        Error::not_found(id)
    }
}

#[async_trait]
impl TaskGateway for ScopedTasks {
    async fn list_tasks(&self, owner: &UserId) -> Result<Vec<Task>> {
        self.inner.enter(GatewayOperation::ListTasks).await?;
        if *owner != self.user {
            tracing::warn!(requested = %owner, caller = %self.user, "cross-owner list refused");
            return Err(Error::Unauthorized);
        }

        let mut rows: Vec<StoredTask> = self
            .inner
            .tasks
            .iter()
            .filter(|entry| entry.task.owner_id == self.user)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| b.seq.cmp(&a.seq));
        Ok(rows.into_iter().map(|stored| stored.task).collect())
    }

    async fn create_task(&self, task: NewTask) -> Result<Task> {
        self.inner.enter(GatewayOperation::CreateTask).await?;
        self.insert(task)
    }

    async fn update_task(&self, id: TaskId, patch: TaskPatch) -> Result<Task> {
        self.inner.enter(GatewayOperation::UpdateTask).await?;
        let patch = patch.validated()?;

        let mut stored = self
            .inner
            .tasks
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(id))?;
        if stored.task.owner_id != self.user {
            let owner = stored.task.owner_id.clone();
            drop(stored);
            return Err(self.owner_mismatch(id, &owner));
        }
        patch.apply_to(&mut stored.task);
        stored.task.updated_at = Utc::now();
        Ok(stored.task.clone())
    }

    async fn delete_task(&self, id: TaskId) -> Result<()> {
        self.inner.enter(GatewayOperation::DeleteTask).await?;
        match self
            .inner
            .tasks
            .remove_if(&id, |_, stored| stored.task.owner_id == self.user)
        {
            Some(_) => Ok(()),
            None => match self.inner.tasks.get(&id).map(|s| s.task.owner_id.clone()) {
                Some(owner) => Err(self.owner_mismatch(id, &owner)),
                None => Err(Error::not_found(id)),
            },
        }
    }
}
