//! In-memory session state shared with UI logic.
//!
//! The [`RequestGate`](crate::gate::RequestGate) derives a [`Session`] on every
//! request. Route handlers publish it into a [`SessionStore`] so components can
//! read the current identity without going back to the gateway.
//!
//! Nothing here is persisted. A fresh store reports `loading = true` until the
//! first [`SessionStore::set_identity`] call, meaning "authentication status
//! not known yet".
//!
//! # Example
//!
//! ```rust
//! use taskgate::session::SessionStore;
//! use taskgate::types::UserId;
//!
//! let store = SessionStore::new();
//! assert!(store.is_loading());
//! assert!(store.identity().is_none());
//!
//! store.set_identity(Some(UserId::new("user-1")));
//! assert!(!store.is_loading());
//! assert_eq!(store.identity(), Some(UserId::new("user-1")));
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::types::UserId;

/// Outcome of one session validation.
///
/// Owned by the gate while a request is processed and dropped with the
/// response; the next request derives a new one from its credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Authenticated user, or `None` for anonymous requests.
    pub identity: Option<UserId>,
    /// When the gateway produced this result.
    pub validated_at: DateTime<Utc>,
}

impl Session {
    /// An authenticated session validated now.
    pub fn authenticated(identity: UserId) -> Self {
        Self {
            identity: Some(identity),
            validated_at: Utc::now(),
        }
    }

    /// An anonymous session validated now.
    pub fn anonymous() -> Self {
        Self {
            identity: None,
            validated_at: Utc::now(),
        }
    }

    /// Whether a user is signed in.
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}

/// Point-in-time view of a [`SessionStore`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    /// Current identity.
    pub identity: Option<UserId>,
    /// `true` until the identity is first known, or while a re-check runs.
    pub loading: bool,
    /// When the identity was last set.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Holds the current identity and a loading flag.
///
/// Construct one per client (or per test) and share it by reference or
/// `Arc`. Observers call [`subscribe`](Self::subscribe) and are woken on every
/// change.
#[derive(Debug)]
pub struct SessionStore {
    state: watch::Sender<SessionSnapshot>,
}

impl SessionStore {
    /// Creates a store in the loading state with no identity.
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionSnapshot {
            identity: None,
            loading: true,
            updated_at: None,
        });
        Self { state }
    }

    /// Sets the identity and clears the loading flag.
    pub fn set_identity(&self, identity: Option<UserId>) {
        tracing::debug!(
            authenticated = identity.is_some(),
            "session identity updated"
        );
        self.state.send_modify(|state| {
            state.identity = identity;
            state.loading = false;
            state.updated_at = Some(Utc::now());
        });
    }

    /// Publishes a session produced by the request gate.
    pub fn publish(&self, session: &Session) {
        let identity = session.identity.clone();
        let validated_at = session.validated_at;
        self.state.send_modify(|state| {
            state.identity = identity;
            state.loading = false;
            state.updated_at = Some(validated_at);
        });
    }

    /// Returns the current identity.
    pub fn identity(&self) -> Option<UserId> {
        self.state.borrow().identity.clone()
    }

    /// Whether a user is signed in.
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().identity.is_some()
    }

    /// The current session, or `None` while the status is still unknown.
    pub fn session(&self) -> Option<Session> {
        let state = self.state.borrow();
        if state.loading && state.updated_at.is_none() {
            return None;
        }
        Some(Session {
            identity: state.identity.clone(),
            validated_at: state.updated_at.unwrap_or_else(Utc::now),
        })
    }

    /// Sets the loading flag without touching the identity.
    pub fn set_loading(&self, loading: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.loading != loading;
            state.loading = loading;
            changed
        });
    }

    /// Whether the authentication status is still being determined.
    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
