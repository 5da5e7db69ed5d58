//! `tracing` subscriber setup for binaries and integration tests.
//!
//! The library only emits events. Hosts that have no subscriber of their own
//! can call [`init`] once at startup.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "taskgate=info";

/// Installs a formatted subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_FILTER`]. Does nothing if a global subscriber is already set.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Installs a subscriber with an explicit filter directive.
///
/// Returns `false` if a global subscriber was already installed.
pub fn try_init(filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .try_init()
        .is_ok()
}
