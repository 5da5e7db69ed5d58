//! Runtime configuration.
//!
//! Configuration is read from a TOML file and then overridden by
//! `TASKGATE_*` environment variables. Every field has a default, so an
//! empty file (or no file at all) yields a working setup.
//!
//! ```toml
//! [gate]
//! login_path = "/login"
//! home_path = "/dashboard"
//! protected_prefixes = ["/dashboard", "/tasks", "/settings"]
//!
//! [cache]
//! stale_time_secs = 300
//! gc_time_secs = 600
//!
//! [cookie]
//! name = "tg-session"
//! secure = true
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "TASKGATE_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskgateConfig {
    /// Request gate routing rules.
    pub gate: GateConfig,
    /// Query cache timings.
    pub cache: CacheConfig,
    /// Session cookie attributes.
    pub cookie: CookieConfig,
}

impl TaskgateConfig {
    /// Parses TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reads and parses a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Loads the file (if given) and applies process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Applies `TASKGATE_*` overrides read through `lookup`.
    ///
    /// `lookup` receives the full variable name. Passing a closure instead of
    /// reading the process environment keeps tests independent of each other.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let name = format!("{ENV_PREFIX}{suffix}");
            lookup(&name).map(|value| (name, value))
        };

        if let Some((_, value)) = var("LOGIN_PATH") {
            self.gate.login_path = value;
        }
        if let Some((_, value)) = var("HOME_PATH") {
            self.gate.home_path = value;
        }
        if let Some((name, value)) = var("STALE_TIME_SECS") {
            self.cache.stale_time_secs = parse_env(&name, &value)?;
        }
        if let Some((name, value)) = var("GC_TIME_SECS") {
            self.cache.gc_time_secs = parse_env(&name, &value)?;
        }
        if let Some((name, value)) = var("READ_RETRIES") {
            self.cache.read_retries = parse_env(&name, &value)?;
        }
        if let Some((_, value)) = var("COOKIE_NAME") {
            self.cookie.name = value;
        }
        if let Some((name, value)) = var("COOKIE_SECURE") {
            self.cookie.secure = parse_env(&name, &value)?;
        }
        Ok(())
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidEnv {
            name: name.to_string(),
            message: e.to_string(),
            value: value.to_string(),
        })
}

/// Routing rules for the request gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Where unauthenticated users are sent.
    pub login_path: String,
    /// Where authenticated users are sent away from public-only pages.
    pub home_path: String,
    /// Pages that require a session.
    pub protected_prefixes: Vec<String>,
    /// Pages only anonymous users should see.
    pub public_only_prefixes: Vec<String>,
    /// Endpoints that answer 401 instead of redirecting.
    pub api_prefixes: Vec<String>,
    /// Prefixes the gate never inspects.
    pub exempt_prefixes: Vec<String>,
    /// Exact paths the gate never inspects.
    pub exempt_paths: Vec<String>,
    /// Regex for static asset paths the gate never inspects.
    pub static_asset_pattern: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            home_path: "/dashboard".to_string(),
            protected_prefixes: strings(&["/dashboard", "/tasks", "/settings"]),
            public_only_prefixes: strings(&["/login", "/register"]),
            api_prefixes: strings(&["/api"]),
            exempt_prefixes: strings(&["/_next/static", "/_next/image", "/static"]),
            exempt_paths: strings(&["/favicon.ico", "/robots.txt"]),
            static_asset_pattern: default_static_asset_pattern(),
        }
    }
}

fn default_static_asset_pattern() -> String {
    r"\.(svg|png|jpe?g|gif|webp|ico|css|js|woff2?)$".to_string()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_string()).collect()
}

/// Query cache timings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds a successful fetch stays fresh.
    pub stale_time_secs: u64,
    /// Seconds an unobserved entry is kept before eviction.
    pub gc_time_secs: u64,
    /// Seconds between background eviction sweeps.
    pub gc_interval_secs: u64,
    /// Automatic retries for transient read failures.
    pub read_retries: u32,
}

impl CacheConfig {
    /// Freshness window.
    pub fn stale_time(&self) -> Duration {
        Duration::from_secs(self.stale_time_secs)
    }

    /// Idle retention window.
    pub fn gc_time(&self) -> Duration {
        Duration::from_secs(self.gc_time_secs)
    }

    /// Sweep interval, never zero.
    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs.max(1))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time_secs: 300,
            gc_time_secs: 600,
            gc_interval_secs: 60,
            read_retries: 1,
        }
    }
}

/// Session cookie attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Cookie name.
    pub name: String,
    /// Cookie `Path` attribute.
    pub path: String,
    /// `Max-Age` for written cookies, in seconds.
    pub max_age_secs: u64,
    /// Adds the `Secure` attribute.
    pub secure: bool,
    /// `SameSite` attribute value.
    pub same_site: String,
    /// Response header used by bearer clients to receive renewed tokens.
    pub bearer_response_header: String,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "tg-session".to_string(),
            path: "/".to_string(),
            max_age_secs: 7 * 24 * 60 * 60,
            secure: true,
            same_site: "Lax".to_string(),
            bearer_response_header: "x-session-token".to_string(),
        }
    }
}
