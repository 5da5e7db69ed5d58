//! Query keys and fetch functions.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::Result;
use crate::gateway::TaskGateway;
use crate::types::{Task, UserId};

/// Identifies one cached collection, e.g. "all tasks for user U".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(String);

impl QueryKey {
    /// Creates a key from a raw string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for every task owned by `owner`.
    pub fn tasks(owner: &UserId) -> Self {
        Self(format!("tasks:{owner}"))
    }

    /// The raw key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Boxed future returned by a [`Fetcher`].
pub type FetchFuture = BoxFuture<'static, Result<Vec<Task>>>;

/// Loads the data for a key. Called once per fetch attempt.
pub type Fetcher = Arc<dyn Fn() -> FetchFuture + Send + Sync>;

/// Wraps an async closure as a [`Fetcher`].
///
/// ```
/// use taskgate::cache::fetcher;
///
/// let empty = fetcher(|| async { Ok(Vec::new()) });
/// # let _ = empty;
/// ```
pub fn fetcher<F, Fut>(f: F) -> Fetcher
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Task>>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Fetcher listing `owner`'s tasks through `gateway`.
pub fn task_list_fetcher(gateway: Arc<dyn TaskGateway>, owner: UserId) -> Fetcher {
    Arc::new(move || {
        let gateway = Arc::clone(&gateway);
        let owner = owner.clone();
        async move { gateway.list_tasks(&owner).await }.boxed()
    })
}
