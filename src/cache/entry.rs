//! Per-key cache state.

use std::time::Duration;

use futures::future::Shared;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use super::key::{FetchFuture, QueryKey};
use crate::error::Error;
use crate::types::{Task, TaskId};

/// Observable state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    /// Never fetched.
    Idle,
    /// A fetch is in flight.
    Fetching,
    /// Data is within its freshness window.
    Fresh,
    /// Data is older than the freshness window or was invalidated.
    Stale,
    /// The last fetch failed. Previous data, if any, is retained.
    Error,
}

/// Point-in-time view of one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot {
    /// The entry's key.
    pub key: QueryKey,
    /// Cached tasks, including unconfirmed optimistic edits.
    pub data: Option<Vec<Task>>,
    /// Current state.
    pub state: QueryState,
    /// Error from the last failed fetch.
    pub error: Option<Error>,
    /// When data was last committed from the gateway.
    pub fetched_at: Option<Instant>,
    /// Whether optimistic edits are awaiting confirmation.
    pub has_pending_edits: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Idle,
    Loaded,
    Failed,
}

#[derive(Clone)]
pub(crate) struct InFlight {
    pub(crate) epoch: u64,
    pub(crate) future: Shared<FetchFuture>,
}

pub(crate) struct Entry {
    pub(crate) generation: u64,
    pub(crate) data: Option<Vec<Task>>,
    pub(crate) status: Status,
    pub(crate) invalidated: bool,
    pub(crate) error: Option<Error>,
    pub(crate) fetched_at: Option<Instant>,
    /// Epoch of the latest fetch start or local write.
    pub(crate) epoch: u64,
    pub(crate) in_flight: Option<InFlight>,
    pub(crate) subscribers: usize,
    pub(crate) last_active: Instant,
    pub(crate) unconfirmed: usize,
    notify: watch::Sender<QuerySnapshot>,
}

impl Entry {
    pub(crate) fn new(key: &QueryKey, generation: u64, now: Instant) -> Self {
        let (notify, _) = watch::channel(QuerySnapshot {
            key: key.clone(),
            data: None,
            state: QueryState::Idle,
            error: None,
            fetched_at: None,
            has_pending_edits: false,
        });
        Self {
            generation,
            data: None,
            status: Status::Idle,
            invalidated: false,
            error: None,
            fetched_at: None,
            epoch: 0,
            in_flight: None,
            subscribers: 0,
            last_active: now,
            unconfirmed: 0,
            notify,
        }
    }

    pub(crate) fn state(&self, now: Instant, stale_time: Duration) -> QueryState {
        if self.in_flight.is_some() {
            return QueryState::Fetching;
        }
        match self.status {
            Status::Idle => QueryState::Idle,
            Status::Failed => QueryState::Error,
            Status::Loaded => {
                let expired = self
                    .fetched_at
                    .map_or(true, |at| now.saturating_duration_since(at) >= stale_time);
                if self.invalidated || expired {
                    QueryState::Stale
                } else {
                    QueryState::Fresh
                }
            },
        }
    }

    /// Whether a read should start a fetch.
    ///
    /// Entries with unconfirmed optimistic edits serve local data until the
    /// mutation settles.
    pub(crate) fn needs_fetch(&self, now: Instant, stale_time: Duration) -> bool {
        self.unconfirmed == 0
            && matches!(
                self.state(now, stale_time),
                QueryState::Idle | QueryState::Stale | QueryState::Error
            )
    }

    pub(crate) fn is_evictable(&self, now: Instant, gc_time: Duration) -> bool {
        self.subscribers == 0
            && self.in_flight.is_none()
            && self.unconfirmed == 0
            && now.saturating_duration_since(self.last_active) >= gc_time
    }

    pub(crate) fn snapshot(&self, key: &QueryKey, now: Instant, stale_time: Duration) -> QuerySnapshot {
        QuerySnapshot {
            key: key.clone(),
            data: self.data.clone(),
            state: self.state(now, stale_time),
            error: self.error.clone(),
            fetched_at: self.fetched_at,
            has_pending_edits: self.unconfirmed > 0,
        }
    }

    pub(crate) fn publish(&self, key: &QueryKey, now: Instant, stale_time: Duration) {
        self.notify.send_replace(self.snapshot(key, now, stale_time));
    }

    pub(crate) fn watch(&self) -> watch::Receiver<QuerySnapshot> {
        self.notify.subscribe()
    }
}

/// Puts `id`'s row back the way it was in `snapshot`, leaving other rows alone.
pub(crate) fn restore_row(data: &mut Vec<Task>, snapshot: &[Task], id: TaskId) {
    let original = snapshot.iter().position(|t| t.id == id);
    let current = data.iter().position(|t| t.id == id);
    match (original, current) {
        (Some(i), Some(j)) => data[j] = snapshot[i].clone(),
        (Some(i), None) => data.insert(i.min(data.len()), snapshot[i].clone()),
        (None, Some(j)) => {
            data.remove(j);
        },
        (None, None) => {},
    }
}
