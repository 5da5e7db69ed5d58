//! Error types for taskgate operations.
//!
//! [`Error`] carries the failure taxonomy shared by the query cache, the
//! mutation coordinator and the gateway traits. Request gate failures never
//! surface through this type: the gate folds them into a
//! [`Decision`](crate::gate::Decision).

use thiserror::Error;

/// Errors returned by cache reads, mutations and gateway calls.
///
/// `Error` is `Clone` so a single deduplicated fetch result can be handed
/// to every subscriber waiting on it.
///
/// # Examples
///
/// ```
/// use taskgate::Error;
///
/// let err = Error::transient("connection reset");
/// assert!(err.is_retryable());
/// assert!(err.to_string().contains("connection reset"));
///
/// let err = Error::validation("title", "must not be empty");
/// assert!(!err.is_retryable());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No valid session. Callers turn this into a redirect, not a visible error.
    #[error("authentication required")]
    Unauthenticated,

    /// The session is valid but the store refused the operation.
    ///
    /// Deliberately generic: the message never reveals whether the row exists.
    #[error("operation not permitted")]
    Unauthorized,

    /// Input rejected before it reached the gateway.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Network or timeout failure talking to the gateway.
    #[error("transient network failure: {message}")]
    TransientNetwork {
        /// Description of the underlying failure.
        message: String,
    },

    /// The target task is missing or was changed underneath the caller.
    #[error("task not found or modified: {task_id}")]
    ConflictOrNotFound {
        /// The task that could not be resolved.
        task_id: String,
    },

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Local persistence (preference file) failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Create a validation error for `field`.
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Create a transient network error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientNetwork {
            message: message.into(),
        }
    }

    /// Create a not-found/conflict error for a task.
    pub fn not_found(task_id: impl ToString) -> Self {
        Self::ConflictOrNotFound {
            task_id: task_id.to_string(),
        }
    }

    /// Whether a read may be retried automatically.
    ///
    /// Writes are never retried, regardless of this flag.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork { .. })
    }
}

/// Errors raised while loading [`TaskgateConfig`](crate::config::TaskgateConfig).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {message}")]
    Read {
        /// File that was being read.
        path: String,
        /// I/O error text.
        message: String,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// An environment override holds an unusable value.
    #[error("invalid value for {name}: {message} (got '{value}')")]
    InvalidEnv {
        /// Variable name.
        name: String,
        /// Parse error text.
        message: String,
        /// The raw value.
        value: String,
    },

    /// A regular expression in the gate configuration does not compile.
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Regex compiler message.
        message: String,
    },

    /// Gate routes that would redirect in a loop.
    #[error("invalid route {path}: {reason}")]
    InvalidRoute {
        /// The offending route.
        path: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
