//! Persisted UI preferences.
//!
//! Non-sensitive view state (task filter, panel visibility) survives
//! restarts in a small JSON file. A missing file means defaults. A corrupt
//! file is logged and replaced with defaults on the next write; it never
//! prevents startup.
//!
//! Writes go to a sibling temp file first and are renamed into place, so a
//! crash mid-write leaves the previous file intact.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Task;

/// Which tasks the list shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskFilter {
    /// Every task.
    #[default]
    All,
    /// Tasks not yet completed.
    Active,
    /// Completed tasks only.
    Completed,
}

impl TaskFilter {
    /// Whether `task` passes the filter.
    pub fn matches(self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Active => !task.completed,
            Self::Completed => task.completed,
        }
    }

    /// Tasks passing the filter, in their original order.
    pub fn apply(self, tasks: &[Task]) -> Vec<Task> {
        tasks.iter().filter(|t| self.matches(t)).cloned().collect()
    }
}

impl fmt::Display for TaskFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::Active => "active",
            Self::Completed => "completed",
        })
    }
}

impl FromStr for TaskFilter {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(Error::validation(
                "filter",
                format!("unknown filter '{other}'"),
            )),
        }
    }
}

/// UI view state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UiPreferences {
    /// Active task filter.
    pub filter: TaskFilter,
    /// Whether the sidebar is expanded.
    pub sidebar_open: bool,
    /// Whether completed tasks are listed at all.
    pub show_completed: bool,
}

impl Default for UiPreferences {
    fn default() -> Self {
        Self {
            filter: TaskFilter::All,
            sidebar_open: true,
            show_completed: true,
        }
    }
}

impl UiPreferences {
    /// Tasks to display under these preferences.
    pub fn visible(&self, tasks: &[Task]) -> Vec<Task> {
        tasks
            .iter()
            .filter(|t| self.filter.matches(t) && (self.show_completed || !t.completed))
            .cloned()
            .collect()
    }
}

/// Preference store backed by an optional JSON file.
#[derive(Debug)]
pub struct PreferenceStore {
    path: Option<PathBuf>,
    current: RwLock<UiPreferences>,
}

impl PreferenceStore {
    /// Opens the store at `path`, loading existing preferences.
    ///
    /// Fails only if the file exists but cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let current = load(&path)?;
        Ok(Self {
            path: Some(path),
            current: RwLock::new(current),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            current: RwLock::new(UiPreferences::default()),
        }
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current preferences.
    pub fn get(&self) -> UiPreferences {
        *self.current.read()
    }

    /// Edits and persists the preferences.
    ///
    /// In-memory state changes only if the write succeeds.
    pub fn update<F>(&self, f: F) -> Result<UiPreferences>
    where
        F: FnOnce(&mut UiPreferences),
    {
        let mut current = self.current.write();
        let mut next = *current;
        f(&mut next);
        if next != *current {
            if let Some(path) = &self.path {
                save(path, &next)?;
            }
            *current = next;
            tracing::debug!(preferences = ?next, "preferences updated");
        }
        Ok(next)
    }

    /// Restores and persists the defaults.
    pub fn reset(&self) -> Result<UiPreferences> {
        self.update(|prefs| *prefs = UiPreferences::default())
    }
}

fn load(path: &Path) -> Result<UiPreferences> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(UiPreferences::default()),
        Err(e) => return Err(Error::Storage(format!("{}: {e}", path.display()))),
    };
    match serde_json::from_slice(&bytes) {
        Ok(prefs) => Ok(prefs),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt preference file, using defaults");
            Ok(UiPreferences::default())
        },
    }
}

fn save(path: &Path, prefs: &UiPreferences) -> Result<()> {
    let storage = |e: std::io::Error| Error::Storage(format!("{}: {e}", path.display()));
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(storage)?;
    }
    let json = serde_json::to_vec_pretty(prefs).map_err(|e| Error::Storage(e.to_string()))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, json).map_err(storage)?;
    std::fs::rename(&tmp, path).map_err(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TaskId, UserId};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn task(title: &str, completed: bool) -> Task {
        let now = Utc::now();
        Task {
            id: TaskId::generate(),
            owner_id: UserId::new("u"),
            title: title.to_string(),
            description: None,
            completed,
            priority: Default::default(),
            due_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn filters_select_tasks() {
        let tasks = vec![task("open", false), task("done", true)];
        assert_eq!(TaskFilter::All.apply(&tasks).len(), 2);
        assert_eq!(TaskFilter::Active.apply(&tasks)[0].title, "open");
        assert_eq!(TaskFilter::Completed.apply(&tasks)[0].title, "done");
    }

    #[test]
    fn hiding_completed_overrides_all_filter() {
        let tasks = vec![task("open", false), task("done", true)];
        let prefs = UiPreferences {
            show_completed: false,
            ..UiPreferences::default()
        };
        let visible = prefs.visible(&tasks);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].title, "open");
    }

    #[test]
    fn filter_parses_case_insensitively() {
        assert_eq!("Active".parse::<TaskFilter>().unwrap(), TaskFilter::Active);
        assert!("someday".parse::<TaskFilter>().is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::open(dir.path().join("prefs.json")).unwrap();
        assert_eq!(store.get(), UiPreferences::default());
    }

    #[test]
    fn updates_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");
        let store = PreferenceStore::open(&path).unwrap();
        store
            .update(|p| {
                p.filter = TaskFilter::Completed;
                p.sidebar_open = false;
            })
            .unwrap();

        let reopened = PreferenceStore::open(&path).unwrap();
        assert_eq!(reopened.get().filter, TaskFilter::Completed);
        assert!(!reopened.get().sidebar_open);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let store = PreferenceStore::open(&path).unwrap();
        assert_eq!(store.get(), UiPreferences::default());

        store.update(|p| p.show_completed = false).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"showCompleted\": false"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, br#"{"filter":"active"}"#).unwrap();
        let prefs = PreferenceStore::open(&path).unwrap().get();
        assert_eq!(prefs.filter, TaskFilter::Active);
        assert!(prefs.sidebar_open);
    }

    #[test]
    fn in_memory_store_does_not_touch_disk() {
        let store = PreferenceStore::in_memory();
        store.update(|p| p.filter = TaskFilter::Active).unwrap();
        assert_eq!(store.get().filter, TaskFilter::Active);
        assert!(store.path().is_none());
        assert_eq!(store.reset().unwrap(), UiPreferences::default());
    }
}
