//! Task mutations with optimistic cache edits.
//!
//! [`MutationCoordinator`] is the write path for one user's tasks. Every
//! mutation runs through [`MutationCoordinator::with_optimistic_apply`]:
//!
//! 1. take the task's mutation slot (FIFO per task),
//! 2. snapshot the cached list and apply the edit locally,
//! 3. call the gateway,
//! 4. on success merge the server row, on failure restore the snapshot,
//! 5. invalidate the query key either way.
//!
//! Writes are never retried. Failures are returned to the caller after the
//! rollback; user-facing messaging is the caller's job.
//!
//! Creates use confirm-then-insert: the row appears in the cache only once
//! the server has returned it with its canonical id.
//!
//! # Examples
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use std::sync::Arc;
//! use taskgate::cache::QueryCache;
//! use taskgate::config::CacheConfig;
//! use taskgate::gateway::InMemoryGateway;
//! use taskgate::mutation::MutationCoordinator;
//! use taskgate::types::{NewTask, UserId};
//!
//! let gateway = InMemoryGateway::new();
//! let alice = UserId::new("alice");
//! let cache = QueryCache::new(&CacheConfig::default());
//! let tasks = MutationCoordinator::new(
//!     cache,
//!     Arc::new(gateway.for_user(alice.clone())),
//!     alice,
//! );
//!
//! tasks.list().await.unwrap();
//! let created = tasks.create(NewTask::new("Buy milk")).await.unwrap();
//! let toggled = tasks.toggle_completed(created.id).await.unwrap();
//! assert!(toggled.completed);
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::cache::{task_list_fetcher, Fetcher, OptimisticEdit, QueryCache, QueryKey, Subscription};
use crate::error::{Error, Result};
use crate::gateway::TaskGateway;
use crate::types::{NewTask, Task, TaskId, TaskPatch, UserId};

/// Kind of mutation, for logging and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// Insert a new task.
    Create,
    /// Patch an existing task.
    Update,
    /// Remove a task.
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// A mutation between its optimistic apply and its settlement.
#[derive(Debug)]
struct PendingMutation {
    kind: MutationKind,
    target: Option<TaskId>,
    /// `None` when nothing was cached, so nothing was applied.
    applied: Option<OptimisticEdit>,
}

type SlotMap = DashMap<TaskId, Arc<Mutex<()>>>;

/// Exclusive right to mutate one task. Released on drop.
struct SlotGuard<'a> {
    slots: &'a SlotMap,
    id: TaskId,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        // Map + this guard: nobody else is queued.
        self.slots
            .remove_if(&self.id, |_, slot| Arc::strong_count(slot) == 2);
    }
}

struct PendingGuard<'a>(&'a AtomicUsize);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Coordinates create/update/delete/toggle for one user's task list.
pub struct MutationCoordinator {
    cache: QueryCache,
    gateway: Arc<dyn TaskGateway>,
    owner: UserId,
    key: QueryKey,
    fetcher: Fetcher,
    slots: SlotMap,
    pending: AtomicUsize,
}

impl fmt::Debug for MutationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationCoordinator")
            .field("owner", &self.owner)
            .field("key", &self.key)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl MutationCoordinator {
    /// Creates a coordinator writing `owner`'s tasks through `gateway`.
    ///
    /// `gateway` must be scoped to `owner`.
    pub fn new(cache: QueryCache, gateway: Arc<dyn TaskGateway>, owner: UserId) -> Self {
        let key = QueryKey::tasks(&owner);
        let fetcher = task_list_fetcher(Arc::clone(&gateway), owner.clone());
        Self {
            cache,
            gateway,
            owner,
            key,
            fetcher,
            slots: DashMap::new(),
            pending: AtomicUsize::new(0),
        }
    }

    /// The user whose tasks this coordinator writes.
    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    /// Cache key of the task list.
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// The underlying cache.
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Reads the task list through the cache.
    pub async fn list(&self) -> Result<Vec<Task>> {
        self.cache.fetch(&self.key, &self.fetcher).await
    }

    /// Observes the task list.
    pub fn subscribe(&self) -> Subscription {
        self.cache.subscribe(&self.key, &self.fetcher)
    }

    /// Mutations started and not yet settled, including queued ones.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Whether a mutation on `id` is running or queued.
    pub fn is_pending(&self, id: TaskId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Creates a task. The cached list gains the server's row on success.
    pub async fn create(&self, task: NewTask) -> Result<Task> {
        let task = task.validated()?;
        let _pending = self.track();
        let gateway = Arc::clone(&self.gateway);
        self.run_optimistic(
            MutationKind::Create,
            None,
            |_| {},
            move || async move { gateway.create_task(task).await },
            |data, created: &Task| {
                if !data.iter().any(|t| t.id == created.id) {
                    data.insert(0, created.clone());
                }
            },
        )
        .await
    }

    /// Applies `patch` to task `id`.
    pub async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<Task> {
        let patch = patch.validated()?;
        let _pending = self.track();
        let _slot = self.acquire_slot(id).await;
        self.run_update(id, patch).await
    }

    /// Flips `completed` on task `id`, as currently seen in the cache.
    pub async fn toggle_completed(&self, id: TaskId) -> Result<Task> {
        let _pending = self.track();
        let _slot = self.acquire_slot(id).await;
        let Some(current) = self.cache.find_task(&self.key, id) else {
            tracing::warn!(task_id = %id, "toggle on uncached task");
            self.cache.invalidate(&self.key);
            return Err(Error::not_found(id));
        };
        self.run_update(id, TaskPatch::completed(!current.completed))
            .await
    }

    /// Deletes task `id`.
    pub async fn delete(&self, id: TaskId) -> Result<()> {
        self.with_optimistic_apply(
            MutationKind::Delete,
            Some(id),
            move |data| data.retain(|t| t.id != id),
            || self.gateway.delete_task(id),
            move |data, _: &()| data.retain(|t| t.id != id),
        )
        .await
    }

    /// Runs one mutation with optimistic apply, commit and rollback.
    ///
    /// `apply` edits the cached list before `remote` is called. On success
    /// `reconcile` merges the server's answer; on failure the list is
    /// restored. The key is invalidated afterwards either way. When `target`
    /// is set, mutations on the same task run one at a time in call order.
    pub async fn with_optimistic_apply<T, A, R, Fut, C>(
        &self,
        kind: MutationKind,
        target: Option<TaskId>,
        apply: A,
        remote: R,
        reconcile: C,
    ) -> Result<T>
    where
        A: FnOnce(&mut Vec<Task>),
        R: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: FnOnce(&mut Vec<Task>, &T),
    {
        let _pending = self.track();
        let _slot = match target {
            Some(id) => Some(self.acquire_slot(id).await),
            None => None,
        };
        self.run_optimistic(kind, target, apply, remote, reconcile)
            .await
    }

    async fn run_update(&self, id: TaskId, patch: TaskPatch) -> Result<Task> {
        let gateway = Arc::clone(&self.gateway);
        let optimistic = patch.clone();
        self.run_optimistic(
            MutationKind::Update,
            Some(id),
            move |data| {
                if let Some(task) = data.iter_mut().find(|t| t.id == id) {
                    optimistic.apply_to(task);
                }
            },
            move || async move { gateway.update_task(id, patch).await },
            |data, updated: &Task| {
                if let Some(task) = data.iter_mut().find(|t| t.id == updated.id) {
                    *task = updated.clone();
                }
            },
        )
        .await
    }

    /// Steps 2-5. The caller holds the slot for `target`.
    async fn run_optimistic<T, A, R, Fut, C>(
        &self,
        kind: MutationKind,
        target: Option<TaskId>,
        apply: A,
        remote: R,
        reconcile: C,
    ) -> Result<T>
    where
        A: FnOnce(&mut Vec<Task>),
        R: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: FnOnce(&mut Vec<Task>, &T),
    {
        let pending = PendingMutation {
            kind,
            target,
            applied: self.cache.begin_optimistic(&self.key, apply),
        };
        tracing::debug!(
            %kind,
            task_id = ?target,
            optimistic = pending.applied.is_some(),
            "mutation started"
        );

        let result = remote().await;
        match &result {
            Ok(value) => {
                let applied = pending.applied.is_some();
                self.cache
                    .commit(&self.key, applied, |data| reconcile(data, value));
                tracing::info!(%kind, task_id = ?target, "mutation confirmed");
            },
            Err(e) => {
                tracing::warn!(
                    kind = %pending.kind,
                    task_id = ?pending.target,
                    error = %e,
                    "mutation failed, rolling back"
                );
                if let Some(edit) = pending.applied {
                    self.cache.restore(&self.key, edit, pending.target);
                }
            },
        }
        self.cache.invalidate(&self.key);
        result
    }

    async fn acquire_slot(&self, id: TaskId) -> SlotGuard<'_> {
        let slot = Arc::clone(self.slots.entry(id).or_default().value());
        if slot.try_lock().is_err() {
            tracing::debug!(task_id = %id, "waiting for earlier mutation on task");
        }
        let guard = slot.lock_owned().await;
        SlotGuard {
            slots: &self.slots,
            id,
            _guard: guard,
        }
    }

    fn track(&self) -> PendingGuard<'_> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        PendingGuard(&self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::gateway::{GatewayOperation, InMemoryGateway};
    use crate::types::Priority;
    use pretty_assertions::assert_eq;

    fn setup() -> (InMemoryGateway, MutationCoordinator) {
        let gateway = InMemoryGateway::new();
        let owner = UserId::new("alice");
        let coordinator = MutationCoordinator::new(
            QueryCache::new(&CacheConfig::default()),
            Arc::new(gateway.for_user(owner.clone())),
            owner,
        );
        (gateway, coordinator)
    }

    #[tokio::test]
    async fn create_applies_defaults_and_inserts_after_confirmation() {
        let (_gateway, tasks) = setup();
        tasks.list().await.unwrap();

        let created = tasks.create(NewTask::new("Buy milk")).await.unwrap();
        assert!(!created.completed);
        assert_eq!(created.priority, Priority::Medium);

        let cached = tasks.cache().peek(tasks.key()).unwrap();
        assert_eq!(cached, vec![created]);
        assert_eq!(tasks.pending_count(), 0);
    }

    #[tokio::test]
    async fn invalid_create_never_reaches_gateway() {
        let (gateway, tasks) = setup();
        let err = tasks.create(NewTask::new("")).await.unwrap_err();
        assert!(matches!(err, Error::Validation { field: "title", .. }));
        assert_eq!(gateway.call_count(GatewayOperation::CreateTask), 0);
    }

    #[tokio::test]
    async fn failed_create_leaves_cache_unchanged() {
        let (gateway, tasks) = setup();
        let existing = gateway.seed_task("alice", NewTask::new("existing")).unwrap();
        tasks.list().await.unwrap();
        gateway
            .faults()
            .fail_next(GatewayOperation::CreateTask, Error::transient("offline"));

        assert!(tasks.create(NewTask::new("lost")).await.is_err());
        assert_eq!(tasks.cache().peek(tasks.key()).unwrap(), vec![existing]);
        assert_eq!(gateway.call_count(GatewayOperation::CreateTask), 1);
    }

    #[tokio::test]
    async fn update_merges_server_row() {
        let (gateway, tasks) = setup();
        let task = gateway.seed_task("alice", NewTask::new("draft")).unwrap();
        tasks.list().await.unwrap();

        let updated = tasks
            .update(task.id, TaskPatch::default().with_priority(Priority::High))
            .await
            .unwrap();
        let cached = tasks.cache().find_task(tasks.key(), task.id).unwrap();
        assert_eq!(cached, updated);
        assert_eq!(cached.title, "draft");
        assert_eq!(cached.priority, Priority::High);
    }

    #[tokio::test]
    async fn empty_patch_is_rejected() {
        let (gateway, tasks) = setup();
        let task = gateway.seed_task("alice", NewTask::new("t")).unwrap();
        assert!(tasks.update(task.id, TaskPatch::default()).await.is_err());
        assert_eq!(gateway.call_count(GatewayOperation::UpdateTask), 0);
    }

    #[tokio::test]
    async fn toggle_uses_cached_state() {
        let (gateway, tasks) = setup();
        let task = gateway
            .seed_task("alice", NewTask::new("t").with_completed(true))
            .unwrap();
        tasks.list().await.unwrap();

        let toggled = tasks.toggle_completed(task.id).await.unwrap();
        assert!(!toggled.completed);
    }

    #[tokio::test]
    async fn toggle_on_uncached_task_is_not_found() {
        let (_gateway, tasks) = setup();
        let err = tasks.toggle_completed(TaskId::generate()).await.unwrap_err();
        assert!(matches!(err, Error::ConflictOrNotFound { .. }));
        assert!(!tasks.is_pending(TaskId::generate()));
    }

    #[tokio::test]
    async fn delete_conflict_restores_row() {
        let (gateway, tasks) = setup();
        let task = gateway.seed_task("alice", NewTask::new("t")).unwrap();
        tasks.list().await.unwrap();
        gateway.for_user("alice").delete_task(task.id).await.unwrap();

        // Cache still shows the row; the server no longer has it.
        let err = tasks.delete(task.id).await.unwrap_err();
        assert!(matches!(err, Error::ConflictOrNotFound { .. }));
        assert_eq!(tasks.cache().peek(tasks.key()).unwrap(), vec![task]);
        assert_eq!(
            tasks.cache().state(tasks.key()),
            Some(crate::cache::QueryState::Stale)
        );
    }

    #[tokio::test]
    async fn slots_are_released_after_settlement() {
        let (gateway, tasks) = setup();
        let task = gateway.seed_task("alice", NewTask::new("t")).unwrap();
        tasks.list().await.unwrap();
        tasks.toggle_completed(task.id).await.unwrap();
        assert!(!tasks.is_pending(task.id));
        assert!(tasks.slots.is_empty());
    }
}
