//! Request gating, session refresh and optimistic task synchronization.
//!
//! taskgate sits between a personal task tracker's HTTP front door and its
//! remote identity/data service. It decides which requests may proceed,
//! keeps the session credential fresh, and gives UI logic a cached,
//! optimistically updated view of the signed-in user's tasks.
//!
//! # Module Organization
//!
//! - [`gate`] - Per-request session validation and allow/redirect/deny decisions
//! - [`session`] - Observable in-memory session state for UI logic
//! - [`cache`] - Keyed, TTL-aware query cache with fetch deduplication
//! - [`mutation`] - Create/update/delete/toggle with optimistic apply and rollback
//! - [`gateway`] - Traits for the remote service plus an in-memory implementation
//! - [`preferences`] - Persisted, non-sensitive UI view state
//! - [`config`] - TOML + environment configuration
//! - [`types`] - Task domain types
//! - [`error`] - Error taxonomy
//!
//! # Quick Start
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use std::sync::Arc;
//! use taskgate::cache::QueryCache;
//! use taskgate::config::TaskgateConfig;
//! use taskgate::gate::{Decision, MemoryChannel, RequestGate};
//! use taskgate::gateway::InMemoryGateway;
//! use taskgate::mutation::MutationCoordinator;
//! use taskgate::session::SessionStore;
//! use taskgate::types::NewTask;
//!
//! let config = TaskgateConfig::default();
//! let gateway = InMemoryGateway::new();
//! let gate = RequestGate::new(Arc::new(gateway.clone()), &config.gate).unwrap();
//! let sessions = SessionStore::new();
//!
//! let mut channel = MemoryChannel::with_credential(gateway.issue_session("alice"));
//! let outcome = gate.handle("/dashboard", &mut channel).await;
//! assert_eq!(outcome.decision(), Decision::Allow);
//! sessions.publish(outcome.session().unwrap());
//!
//! let user = sessions.identity().unwrap();
//! let tasks = MutationCoordinator::new(
//!     QueryCache::new(&config.cache),
//!     Arc::new(gateway.for_user(user.clone())),
//!     user,
//! );
//! tasks.create(NewTask::new("Buy milk")).await.unwrap();
//! assert_eq!(tasks.list().await.unwrap().len(), 1);
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod gate;
pub mod gateway;
pub mod mutation;
pub mod preferences;
pub mod session;
pub mod types;

#[cfg(feature = "logging")]
pub mod logging;

// Re-exports for ergonomic access
pub use error::{ConfigError, Error, Result};
