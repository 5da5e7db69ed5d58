//! Keyed, TTL-aware cache of fetched task collections.
//!
//! Each [`QueryKey`] owns one entry moving through
//! `idle -> fetching -> fresh -> stale -> fetching -> ...`, with
//! `fetching -> error` on failure. Reads go through [`QueryCache::fetch`],
//! which serves fresh data directly and otherwise starts (or joins) a fetch.
//!
//! # Response ordering
//!
//! Every fetch start and every local write takes a new epoch from a
//! cache-wide counter. A fetch result is committed only if its epoch is still
//! the entry's latest; otherwise it is discarded and the caller follows the
//! newer fetch, or receives the current data if a local write superseded it.
//!
//! # Concurrency
//!
//! Entries live behind a `parking_lot::Mutex` that is never held across an
//! `.await`. Concurrent fetches share one [`Shared`](futures::future::Shared)
//! future, so a second requester attaches to the in-flight request.
//!
//! # Examples
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use taskgate::cache::{fetcher, QueryCache, QueryKey, QueryState};
//! use taskgate::config::CacheConfig;
//!
//! let cache = QueryCache::new(&CacheConfig::default());
//! let key = QueryKey::new("tasks:demo");
//! let load = fetcher(|| async { Ok(Vec::new()) });
//!
//! let tasks = cache.fetch(&key, &load).await.unwrap();
//! assert!(tasks.is_empty());
//! assert_eq!(cache.state(&key), Some(QueryState::Fresh));
//!
//! cache.invalidate(&key);
//! assert_eq!(cache.state(&key), Some(QueryState::Stale));
//! # }
//! ```

mod entry;
mod key;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::types::{Task, TaskId};

use entry::{restore_row, Entry, InFlight, Status};
pub use entry::{QuerySnapshot, QueryState};
pub use key::{fetcher, task_list_fetcher, FetchFuture, Fetcher, QueryKey};

/// How a finished fetch related to the entry when it settled.
enum Settled {
    /// This fetch's result is now the entry's data.
    Committed,
    /// Another awaiter of the same fetch already committed it.
    AlreadySettled,
    /// A newer fetch is in flight.
    Superseded(InFlight),
    /// A local write happened after this fetch started.
    Overwritten(Vec<Task>),
    /// The entry was removed.
    Gone,
}

struct CacheInner {
    entries: Mutex<HashMap<QueryKey, Entry>>,
    epoch: AtomicU64,
    stale_time: Duration,
    gc_time: Duration,
    gc_interval: Duration,
    read_retries: u32,
}

impl CacheInner {
    fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn entry<'a>(
        &self,
        entries: &'a mut HashMap<QueryKey, Entry>,
        key: &QueryKey,
        now: Instant,
    ) -> &'a mut Entry {
        entries
            .entry(key.clone())
            .or_insert_with(|| Entry::new(key, self.next_epoch(), now))
    }

    fn start_fetch(&self, key: &QueryKey, entry: &mut Entry, fetcher: &Fetcher, now: Instant) -> InFlight {
        let epoch = self.next_epoch();
        let future = fetch_with_retry(key.clone(), Arc::clone(fetcher), self.read_retries)
            .boxed()
            .shared();
        let in_flight = InFlight { epoch, future };
        if entry.in_flight.replace(in_flight.clone()).is_some() {
            tracing::debug!(%key, epoch, "in-flight fetch superseded");
        } else {
            tracing::debug!(%key, epoch, "fetch started");
        }
        entry.epoch = epoch;
        // An invalidation after this point outlives the fetch's result.
        entry.invalidated = false;
        entry.last_active = now;
        entry.publish(key, now, self.stale_time);
        in_flight
    }

    /// Records a local write: new epoch, in-flight fetch dropped.
    fn mark_written(&self, key: &QueryKey, entry: &mut Entry, now: Instant) {
        entry.epoch = self.next_epoch();
        if entry.in_flight.take().is_some() {
            tracing::debug!(%key, "in-flight fetch discarded after local write");
        }
        entry.last_active = now;
        entry.publish(key, now, self.stale_time);
    }

    fn settle(&self, key: &QueryKey, epoch: u64, result: &Result<Vec<Task>>) -> Settled {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return Settled::Gone;
        };

        if let Some(newer) = entry.in_flight.as_ref().filter(|f| f.epoch != epoch) {
            return Settled::Superseded(newer.clone());
        }
        if entry.in_flight.is_none() {
            if entry.epoch == epoch {
                return Settled::AlreadySettled;
            }
            return match &entry.data {
                Some(current) => Settled::Overwritten(current.clone()),
                None => Settled::Gone,
            };
        }

        entry.in_flight = None;
        match result {
            Ok(tasks) => {
                tracing::debug!(%key, epoch, count = tasks.len(), "fetch committed");
                entry.data = Some(tasks.clone());
                entry.status = Status::Loaded;
                entry.error = None;
                entry.fetched_at = Some(now);
            },
            Err(e) => {
                tracing::warn!(%key, error = %e, "fetch failed, keeping last known data");
                entry.status = Status::Failed;
                entry.error = Some(e.clone());
            },
        }
        entry.publish(key, now, self.stale_time);
        Settled::Committed
    }
}

async fn fetch_with_retry(key: QueryKey, fetcher: Fetcher, retries: u32) -> Result<Vec<Task>> {
    let mut attempt = 0;
    loop {
        match fetcher().await {
            Ok(tasks) => return Ok(tasks),
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                tracing::debug!(%key, attempt, error = %e, "retrying fetch");
            },
            Err(e) => return Err(e),
        }
    }
}

/// In-memory query cache.
///
/// Cloning is cheap; clones share entries.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.len())
            .field("stale_time", &self.inner.stale_time)
            .field("gc_time", &self.inner.gc_time)
            .finish()
    }
}

impl QueryCache {
    /// Creates an empty cache.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                epoch: AtomicU64::new(0),
                stale_time: config.stale_time(),
                gc_time: config.gc_time(),
                gc_interval: config.gc_interval(),
                read_retries: config.read_retries,
            }),
        }
    }

    /// Returns the data for `key`, fetching if it is missing, stale or failed.
    ///
    /// Joins an in-flight fetch instead of starting a second one.
    pub async fn fetch(&self, key: &QueryKey, fetcher: &Fetcher) -> Result<Vec<Task>> {
        let pending = {
            let now = Instant::now();
            let mut entries = self.inner.entries.lock();
            let entry = self.inner.entry(&mut entries, key, now);
            entry.last_active = now;
            if let Some(in_flight) = &entry.in_flight {
                tracing::debug!(%key, "joining in-flight fetch");
                in_flight.clone()
            } else if entry.needs_fetch(now, self.inner.stale_time) {
                self.inner.start_fetch(key, entry, fetcher, now)
            } else {
                return Ok(entry.data.clone().unwrap_or_default());
            }
        };
        self.await_fetch(key, pending).await
    }

    /// Starts a new fetch for `key` unconditionally, superseding any in flight.
    pub async fn refetch(&self, key: &QueryKey, fetcher: &Fetcher) -> Result<Vec<Task>> {
        let pending = {
            let now = Instant::now();
            let mut entries = self.inner.entries.lock();
            let entry = self.inner.entry(&mut entries, key, now);
            self.inner.start_fetch(key, entry, fetcher, now)
        };
        self.await_fetch(key, pending).await
    }

    async fn await_fetch(&self, key: &QueryKey, mut pending: InFlight) -> Result<Vec<Task>> {
        loop {
            let result = pending.future.clone().await;
            match self.inner.settle(key, pending.epoch, &result) {
                Settled::Committed | Settled::AlreadySettled | Settled::Gone => return result,
                Settled::Superseded(newer) => pending = newer,
                Settled::Overwritten(current) => return Ok(current),
            }
        }
    }

    /// Registers an observer for `key`.
    ///
    /// Starts a background fetch if the entry needs one. Must be called from
    /// within a Tokio runtime.
    pub fn subscribe(&self, key: &QueryKey, fetcher: &Fetcher) -> Subscription {
        let (generation, receiver, drive) = {
            let now = Instant::now();
            let mut entries = self.inner.entries.lock();
            let entry = self.inner.entry(&mut entries, key, now);
            entry.subscribers += 1;
            entry.last_active = now;
            let receiver = entry.watch();
            let drive = if let Some(in_flight) = &entry.in_flight {
                Some(in_flight.clone())
            } else if entry.needs_fetch(now, self.inner.stale_time) {
                Some(self.inner.start_fetch(key, entry, fetcher, now))
            } else {
                None
            };
            (entry.generation, receiver, drive)
        };

        if let Some(pending) = drive {
            let cache = self.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let _ = cache.await_fetch(&key, pending).await;
            });
        }

        Subscription {
            cache: self.clone(),
            key: key.clone(),
            fetcher: Arc::clone(fetcher),
            generation,
            receiver,
        }
    }

    fn release(&self, key: &QueryKey, generation: u64) {
        let mut entries = self.inner.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            if entry.generation == generation {
                entry.subscribers = entry.subscribers.saturating_sub(1);
                entry.last_active = Instant::now();
            }
        }
    }

    /// Marks `key` stale. Does not refetch; the next read or subscription does.
    pub fn invalidate(&self, key: &QueryKey) {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.invalidated = true;
            tracing::debug!(%key, "entry invalidated");
            entry.publish(key, now, self.inner.stale_time);
        }
    }

    /// Removes `key` outright. Returns whether it existed.
    pub fn remove(&self, key: &QueryKey) -> bool {
        self.inner.entries.lock().remove(key).is_some()
    }

    /// Drops entries nobody observes that have been idle past the retention
    /// window. Returns how many were evicted.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let gc_time = self.inner.gc_time;
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|key, entry| {
            let evict = entry.is_evictable(now, gc_time);
            if evict {
                tracing::debug!(%key, "evicting idle entry");
            }
            !evict
        });
        before - entries.len()
    }

    /// Spawns a task that calls [`evict_idle`](Self::evict_idle) periodically.
    ///
    /// The task ends once every clone of the cache is dropped.
    pub fn spawn_gc(&self) -> JoinHandle<()> {
        let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);
        let period = self.inner.gc_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let evicted = QueryCache { inner }.evict_idle();
                if evicted > 0 {
                    tracing::debug!(evicted, "cache sweep");
                }
            }
        })
    }

    /// Current view of `key`.
    pub fn snapshot(&self, key: &QueryKey) -> Option<QuerySnapshot> {
        let now = Instant::now();
        let entries = self.inner.entries.lock();
        entries
            .get(key)
            .map(|entry| entry.snapshot(key, now, self.inner.stale_time))
    }

    /// Current state of `key`.
    pub fn state(&self, key: &QueryKey) -> Option<QueryState> {
        let now = Instant::now();
        let entries = self.inner.entries.lock();
        entries
            .get(key)
            .map(|entry| entry.state(now, self.inner.stale_time))
    }

    /// Cached data for `key`, without fetching.
    pub fn peek(&self, key: &QueryKey) -> Option<Vec<Task>> {
        self.inner
            .entries
            .lock()
            .get(key)
            .and_then(|entry| entry.data.clone())
    }

    /// Cached row `id` under `key`, without fetching.
    pub fn find_task(&self, key: &QueryKey, id: TaskId) -> Option<Task> {
        self.inner
            .entries
            .lock()
            .get(key)
            .and_then(|entry| entry.data.as_ref())
            .and_then(|data| data.iter().find(|t| t.id == id).cloned())
    }

    /// Number of subscribers on `key`.
    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.inner
            .entries
            .lock()
            .get(key)
            .map_or(0, |entry| entry.subscribers)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Whether the cache has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ─── Optimistic transitions (mutation coordinator only) ────────────

    /// Applies an unconfirmed local edit and returns the prior data.
    ///
    /// Returns `None`, leaving the entry untouched, when `key` holds no data.
    pub(crate) fn begin_optimistic<F>(&self, key: &QueryKey, apply: F) -> Option<OptimisticEdit>
    where
        F: FnOnce(&mut Vec<Task>),
    {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        let entry = entries.get_mut(key)?;
        let data = entry.data.as_mut()?;
        let snapshot = data.clone();
        apply(data);
        entry.unconfirmed += 1;
        self.inner.mark_written(key, entry, now);
        Some(OptimisticEdit {
            snapshot,
            epoch: entry.epoch,
        })
    }

    /// Confirms an edit, merging the server's answer via `reconcile`.
    pub(crate) fn commit<F>(&self, key: &QueryKey, applied: bool, reconcile: F)
    where
        F: FnOnce(&mut Vec<Task>),
    {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if applied {
            entry.unconfirmed = entry.unconfirmed.saturating_sub(1);
        }
        match entry.data.as_mut() {
            Some(data) => {
                reconcile(data);
                self.inner.mark_written(key, entry, now);
            },
            // Nothing cached yet: leave a pending first load alone.
            None => entry.publish(key, now, self.inner.stale_time),
        }
    }

    /// Rolls an edit back.
    ///
    /// If nothing else wrote to the entry since `edit` was applied, its
    /// snapshot is restored exactly. Otherwise only `target`'s row is
    /// reverted so later edits to other tasks survive.
    pub(crate) fn restore(&self, key: &QueryKey, edit: OptimisticEdit, target: Option<TaskId>) {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        entry.unconfirmed = entry.unconfirmed.saturating_sub(1);
        let written = if entry.epoch == edit.epoch {
            entry.data = Some(edit.snapshot);
            true
        } else if let (Some(data), Some(id)) = (entry.data.as_mut(), target) {
            tracing::debug!(%key, task_id = %id, "entry changed since edit, reverting one row");
            restore_row(data, &edit.snapshot, id);
            true
        } else {
            false
        };
        if written {
            self.inner.mark_written(key, entry, now);
        } else {
            entry.publish(key, now, self.inner.stale_time);
        }
    }
}

/// An applied, unconfirmed edit: the data before it and the write epoch it
/// took.
#[derive(Debug)]
pub(crate) struct OptimisticEdit {
    snapshot: Vec<Task>,
    epoch: u64,
}

/// Live handle on one cache entry.
///
/// Dropping it unregisters the observer and starts the entry's idle clock.
pub struct Subscription {
    cache: QueryCache,
    key: QueryKey,
    fetcher: Fetcher,
    generation: u64,
    receiver: watch::Receiver<QuerySnapshot>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// The observed key.
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Current view of the entry.
    pub fn current(&self) -> QuerySnapshot {
        self.cache
            .snapshot(&self.key)
            .unwrap_or_else(|| self.receiver.borrow().clone())
    }

    /// Waits for the next change. Returns `None` once the entry is removed.
    pub async fn changed(&mut self) -> Option<QuerySnapshot> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Reads through the cache with this subscription's fetcher.
    pub async fn data(&self) -> Result<Vec<Task>> {
        self.cache.fetch(&self.key, &self.fetcher).await
    }

    /// Forces a new fetch.
    pub async fn refetch(&self) -> Result<Vec<Task>> {
        self.cache.refetch(&self.key, &self.fetcher).await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cache.release(&self.key, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::UserId;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    fn task(title: &str) -> Task {
        let now = Utc::now();
        Task {
            id: TaskId::generate(),
            owner_id: UserId::new("u"),
            title: title.to_string(),
            description: None,
            completed: false,
            priority: Default::default(),
            due_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn cache() -> QueryCache {
        QueryCache::new(&CacheConfig::default())
    }

    fn counting(tasks: Vec<Task>) -> (Fetcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let f = fetcher(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let tasks = tasks.clone();
            async move { Ok(tasks) }
        });
        (f, calls)
    }

    #[tokio::test]
    async fn fresh_data_is_served_without_refetch() {
        let cache = cache();
        let key = QueryKey::new("k");
        let (load, calls) = counting(vec![task("a")]);

        cache.fetch(&key, &load).await.unwrap();
        cache.fetch(&key, &load).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_read_failure_is_retried_once() {
        let cache = cache();
        let key = QueryKey::new("k");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let load = fetcher(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Error::transient("reset"))
                } else {
                    Ok(Vec::new())
                }
            }
        });

        assert!(cache.fetch(&key, &load).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_keeps_last_known_data() {
        let cache = cache();
        let key = QueryKey::new("k");
        let (ok, _) = counting(vec![task("kept")]);
        cache.fetch(&key, &ok).await.unwrap();

        let failing = fetcher(|| async { Err(Error::Unauthorized) });
        let err = cache.refetch(&key, &failing).await.unwrap_err();
        assert_eq!(err, Error::Unauthorized);

        let snapshot = cache.snapshot(&key).unwrap();
        assert_eq!(snapshot.state, QueryState::Error);
        assert_eq!(snapshot.error, Some(Error::Unauthorized));
        assert_eq!(snapshot.data.unwrap()[0].title, "kept");
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let cache = cache();
        let key = QueryKey::new("k");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let load = fetcher(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Unauthorized) }
        });
        assert!(cache.fetch(&key, &load).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn optimistic_edit_then_restore_is_exact() {
        let cache = cache();
        let key = QueryKey::new("k");
        let original = vec![task("a"), task("b")];
        let (load, _) = counting(original.clone());
        cache.fetch(&key, &load).await.unwrap();

        let edit = cache
            .begin_optimistic(&key, |data| data[0].completed = true)
            .unwrap();
        assert!(cache.peek(&key).unwrap()[0].completed);
        assert!(cache.snapshot(&key).unwrap().has_pending_edits);

        cache.restore(&key, edit, Some(original[0].id));
        assert_eq!(cache.peek(&key).unwrap(), original);
        assert!(!cache.snapshot(&key).unwrap().has_pending_edits);
    }

    #[tokio::test]
    async fn restore_after_later_write_reverts_only_target_row() {
        let cache = cache();
        let key = QueryKey::new("k");
        let original = vec![task("a"), task("b")];
        let (load, _) = counting(original.clone());
        cache.fetch(&key, &load).await.unwrap();

        let first = cache
            .begin_optimistic(&key, |data| data[0].completed = true)
            .unwrap();
        let second = cache
            .begin_optimistic(&key, |data| data[1].title = "renamed".to_string())
            .unwrap();
        cache.commit(&key, true, |_| {});
        drop(second);

        cache.restore(&key, first, Some(original[0].id));
        let data = cache.peek(&key).unwrap();
        assert!(!data[0].completed);
        assert_eq!(data[1].title, "renamed");
        assert!(!cache.snapshot(&key).unwrap().has_pending_edits);
    }

    #[tokio::test]
    async fn commit_without_data_keeps_first_load() {
        let cache = cache();
        let key = QueryKey::new("k");
        let gate = Arc::new(tokio::sync::Notify::new());
        let waiter = Arc::clone(&gate);
        let load = fetcher(move || {
            let waiter = Arc::clone(&waiter);
            async move {
                waiter.notified().await;
                Ok(vec![task("loaded")])
            }
        });

        let pending = tokio::spawn({
            let cache = cache.clone();
            let key = key.clone();
            async move { cache.fetch(&key, &load).await }
        });
        while cache.snapshot(&key).map(|s| s.state) != Some(QueryState::Fetching) {
            tokio::task::yield_now().await;
        }

        cache.commit(&key, false, |data| data.clear());
        assert_eq!(cache.snapshot(&key).unwrap().state, QueryState::Fetching);

        gate.notify_one();
        let loaded = pending.await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(cache.peek(&key).unwrap(), loaded);
    }

    #[tokio::test]
    async fn optimistic_edit_needs_cached_data() {
        let cache = cache();
        let key = QueryKey::new("k");
        assert!(cache.begin_optimistic(&key, |_| {}).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn subscription_drop_releases_observer() {
        let cache = cache();
        let key = QueryKey::new("k");
        let (load, _) = counting(Vec::new());

        let sub = cache.subscribe(&key, &load);
        assert_eq!(cache.subscriber_count(&key), 1);
        drop(sub);
        assert_eq!(cache.subscriber_count(&key), 0);
    }

    #[tokio::test]
    async fn subscription_after_remove_does_not_touch_new_entry() {
        let cache = cache();
        let key = QueryKey::new("k");
        let (load, _) = counting(Vec::new());

        let old = cache.subscribe(&key, &load);
        cache.remove(&key);
        let _new = cache.subscribe(&key, &load);
        drop(old);
        assert_eq!(cache.subscriber_count(&key), 1);
    }
}
