//! Path classification for the request gate.

use regex::Regex;

use crate::config::GateConfig;
use crate::error::ConfigError;

/// Compiled routing rules.
///
/// Prefix matching is segment-aware: `/tasks` matches `/tasks` and
/// `/tasks/42` but not `/taskset`.
#[derive(Debug, Clone)]
pub struct PathRules {
    protected: Vec<String>,
    public_only: Vec<String>,
    api: Vec<String>,
    exempt_prefixes: Vec<String>,
    exempt_paths: Vec<String>,
    static_assets: Regex,
}

impl PathRules {
    /// Compiles `config`.
    pub fn from_config(config: &GateConfig) -> Result<Self, ConfigError> {
        let static_assets =
            Regex::new(&config.static_asset_pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: config.static_asset_pattern.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            protected: config.protected_prefixes.clone(),
            public_only: config.public_only_prefixes.clone(),
            api: config.api_prefixes.clone(),
            exempt_prefixes: config.exempt_prefixes.clone(),
            exempt_paths: config.exempt_paths.clone(),
            static_assets,
        })
    }

    /// Static assets and framework internals the gate skips entirely.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|p| p == path)
            || matches_any(&self.exempt_prefixes, path)
            || self.static_assets.is_match(path)
    }

    /// Pages that require a session.
    pub fn is_protected(&self, path: &str) -> bool {
        matches_any(&self.protected, path)
    }

    /// Pages authenticated users are sent away from.
    pub fn is_public_only(&self, path: &str) -> bool {
        matches_any(&self.public_only, path)
    }

    /// Endpoints answered with a denial instead of a redirect.
    pub fn is_api(&self, path: &str) -> bool {
        matches_any(&self.api, path)
    }
}

fn matches_any(prefixes: &[String], path: &str) -> bool {
    prefixes.iter().any(|prefix| matches_prefix(prefix, path))
}

/// Segment-aware prefix match.
pub(crate) fn matches_prefix(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() {
        return false;
    }
    if prefix == "/" {
        return path.starts_with('/');
    }
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
