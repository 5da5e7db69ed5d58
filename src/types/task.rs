//! Task records and the payloads used to create and change them.
//!
//! [`Task`] is the canonical row as returned by the gateway. [`NewTask`] and
//! [`TaskPatch`] are the write payloads; both are validated locally before
//! anything is sent, so malformed input surfaces as
//! [`Error::Validation`](crate::Error::Validation) without a round trip.
//!
//! # Serialization
//!
//! All types use `camelCase` field names, matching the row layout of the
//! backing store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum title length, in characters.
pub const MAX_TITLE_CHARS: usize = 100;

/// Maximum description length, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 500;

/// Unique identifier for a task, assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Wraps an existing UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|e| Error::validation("id", e.to_string()))
    }
}

/// Identity of an authenticated user, as issued by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Can wait.
    Low,
    /// The default for new tasks.
    #[default]
    Medium,
    /// Needs attention first.
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(Error::validation(
                "priority",
                format!("unknown priority '{other}'"),
            )),
        }
    }
}

/// A task row as stored by the backing service.
///
/// `owner_id` never changes after creation. `id`, `created_at` and
/// `updated_at` are stamped by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Server-assigned identifier.
    pub id: TaskId,
    /// The user that owns this task.
    pub owner_id: UserId,
    /// Short title, 1 to 100 characters.
    pub title: String,
    /// Optional description, up to 500 characters.
    pub description: Option<String>,
    /// Whether the task is done.
    pub completed: bool,
    /// Task priority.
    pub priority: Priority,
    /// Optional due date.
    pub due_date: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last confirmed write.
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating a task.
///
/// Only the title is required. Unset fields take the defaults
/// `completed = false` and `priority = medium`.
///
/// # Examples
///
/// ```
/// use taskgate::types::{NewTask, Priority};
///
/// let new = NewTask::new("Buy milk");
/// assert_eq!(new.priority, Priority::Medium);
/// assert!(!new.completed);
///
/// let checked = NewTask::new("  Write report ")
///     .with_description("")
///     .validated()
///     .unwrap();
/// assert_eq!(checked.title, "Write report");
/// assert!(checked.description.is_none());
///
/// assert!(NewTask::new("   ").validated().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    /// Task title (required).
    pub title: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Initial completion flag.
    #[serde(default)]
    pub completed: bool,
    /// Initial priority.
    #[serde(default)]
    pub priority: Priority,
    /// Optional due date.
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

impl NewTask {
    /// Creates a payload with the given title and default fields.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the due date.
    pub fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    /// Sets the initial completion flag.
    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    /// Checks field limits and returns the normalized payload.
    ///
    /// The title is trimmed; an empty description becomes `None`.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if the title is empty or too long, or the
    /// description is too long.
    pub fn validated(self) -> Result<Self> {
        Ok(Self {
            title: normalize_title(&self.title)?,
            description: normalize_description(self.description)?,
            ..self
        })
    }
}

/// Partial update for a task.
///
/// `None` leaves a field unchanged. For the nullable fields, `Some(None)`
/// clears the value.
///
/// # Examples
///
/// ```
/// use taskgate::types::TaskPatch;
///
/// let patch = TaskPatch::completed(true);
/// assert_eq!(patch.completed, Some(true));
/// assert!(patch.title.is_none());
/// assert!(!patch.is_empty());
/// assert!(TaskPatch::default().is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description; `Some(None)` clears it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub description: Option<Option<String>>,
    /// New completion flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    /// New priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// New due date; `Some(None)` clears it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub due_date: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
    /// A patch that only sets the completion flag.
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Default::default()
        }
    }

    /// Sets the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets or clears the description.
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets or clears the due date.
    pub fn with_due_date(mut self, due_date: Option<DateTime<Utc>>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    /// Returns `true` if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.completed.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
    }

    /// Checks field limits and returns the normalized patch.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for an empty patch or a field out of bounds.
    pub fn validated(self) -> Result<Self> {
        if self.is_empty() {
            return Err(Error::validation("patch", "no fields to update"));
        }
        let title = self.title.as_deref().map(normalize_title).transpose()?;
        let description = self
            .description
            .map(normalize_description)
            .transpose()?;
        Ok(Self {
            title,
            description,
            ..self
        })
    }

    /// Applies the patch to a task in place.
    ///
    /// Used for the optimistic view only; `updated_at` is left alone because
    /// the server owns it.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            task.description.clone_from(description);
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
    }
}

// An explicit `null` means "clear", an absent key means "leave unchanged".
fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn normalize_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("title", "must not be empty"));
    }
    let chars = trimmed.chars().count();
    if chars > MAX_TITLE_CHARS {
        return Err(Error::validation(
            "title",
            format!("{chars} characters exceeds the {MAX_TITLE_CHARS} character limit"),
        ));
    }
    Ok(trimmed.to_string())
}

fn normalize_description(description: Option<String>) -> Result<Option<String>> {
    match description {
        None => Ok(None),
        Some(text) if text.trim().is_empty() => Ok(None),
        Some(text) => {
            let chars = text.chars().count();
            if chars > MAX_DESCRIPTION_CHARS {
                return Err(Error::validation(
                    "description",
                    format!(
                        "{chars} characters exceeds the {MAX_DESCRIPTION_CHARS} character limit"
                    ),
                ));
            }
            Ok(Some(text))
        },
    }
}
