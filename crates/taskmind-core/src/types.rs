use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TaskmindError};

/// Generate a fresh opaque entity identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Declares a string-backed enum with `as_str`, `Display` and `FromStr`.
///
/// The text form is the stored column value and the serde representation.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = TaskmindError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err(TaskmindError::Serialization(format!(
                        concat!("Unknown ", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

// =============================================================================
// Enums
// =============================================================================

text_enum! {
    /// Kind of work a task represents.
    pub enum TaskType {
        Feature => "FEATURE",
        Bug => "BUG",
        Chore => "CHORE",
        Research => "RESEARCH",
        Meeting => "MEETING",
        Other => "OTHER",
    }
}

text_enum! {
    /// Task lifecycle state. Legal moves are defined in `lifecycle`.
    pub enum TaskStatus {
        Created => "CREATED",
        Planned => "PLANNED",
        InProgress => "IN_PROGRESS",
        Blocked => "BLOCKED",
        Review => "REVIEW",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
}

text_enum! {
    /// Priority shared by tasks and notifications.
    pub enum Priority {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
        Urgent => "URGENT",
    }
}

text_enum! {
    /// How a time entry was recorded.
    pub enum TimeEntryType {
        Manual => "MANUAL",
        Tracked => "TRACKED",
        Imported => "IMPORTED",
    }
}

text_enum! {
    pub enum NotificationType {
        Reminder => "REMINDER",
        Deadline => "DEADLINE",
        Suggestion => "SUGGESTION",
        Alert => "ALERT",
        System => "SYSTEM",
    }
}

text_enum! {
    /// Notification lifecycle: PENDING -> DELIVERED -> READ / ACTED_UPON /
    /// DISMISSED / EXPIRED.
    pub enum NotificationStatus {
        Pending => "PENDING",
        Delivered => "DELIVERED",
        Read => "READ",
        ActedUpon => "ACTED_UPON",
        Dismissed => "DISMISSED",
        Expired => "EXPIRED",
    }
}

text_enum! {
    /// Category of a remembered item.
    pub enum MemoryType {
        Fact => "FACT",
        Preference => "PREFERENCE",
        Pattern => "PATTERN",
        Context => "CONTEXT",
        Insight => "INSIGHT",
        Interaction => "INTERACTION",
    }
}

text_enum! {
    /// Label of a directed edge between two memories.
    pub enum RelationType {
        RelatedTo => "RELATED_TO",
        DerivedFrom => "DERIVED_FROM",
        Supports => "SUPPORTS",
        Contradicts => "CONTRADICTS",
        Supersedes => "SUPERSEDES",
    }
}

impl Default for TaskType {
    fn default() -> Self {
        TaskType::Other
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Created
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl Default for TimeEntryType {
    fn default() -> Self {
        TimeEntryType::Manual
    }
}

impl Default for NotificationType {
    fn default() -> Self {
        NotificationType::System
    }
}

impl Default for NotificationStatus {
    fn default() -> Self {
        NotificationStatus::Pending
    }
}

impl Default for MemoryType {
    fn default() -> Self {
        MemoryType::Fact
    }
}

impl Default for RelationType {
    fn default() -> Self {
        RelationType::RelatedTo
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Free-form key/value metadata attached to every entity.
///
/// Stored as a JSON object in a TEXT column. `encode`/`decode` are the only
/// codec for that column; an empty or `null` column decodes to an empty map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(pub BTreeMap<String, serde_json::Value>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Self::default());
        }
        Ok(Self(serde_json::from_str(trimmed)?))
    }
}

// =============================================================================
// Tasks
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assignee: Option<String>,
    pub project_id: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_minutes: Option<i64>,
    pub actual_minutes: Option<i64>,
    /// Ids of tasks this task depends on.
    pub dependencies: Vec<String>,
    pub tags: Vec<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied fields for a new task. Identity and timestamps are
/// assigned by the repository.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assignee: Option<String>,
    pub project_id: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_minutes: Option<i64>,
    pub dependencies: Vec<String>,
    pub tags: Vec<String>,
    pub metadata: Metadata,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Partial task update. `None` leaves a field untouched; for nullable
/// columns `Some(None)` clears the value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub assignee: Option<Option<String>>,
    pub project_id: Option<Option<String>>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub estimated_minutes: Option<Option<i64>>,
    pub actual_minutes: Option<Option<i64>>,
    pub dependencies: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Metadata>,
}

// =============================================================================
// Time entries
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: String,
    pub user_id: Option<String>,
    pub task_id: Option<String>,
    pub start_time: DateTime<Utc>,
    /// `None` while the timer is still running.
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub description: String,
    pub category: String,
    pub entry_type: TimeEntryType,
    pub billable: bool,
    pub tags: Vec<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimeEntry {
    pub fn is_running(&self) -> bool {
        self.end_time.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewTimeEntry {
    pub user_id: Option<String>,
    pub task_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Derived from start/end when omitted and both are known.
    pub duration_minutes: Option<i64>,
    pub description: String,
    pub category: String,
    pub entry_type: TimeEntryType,
    pub billable: bool,
    pub tags: Vec<String>,
    pub metadata: Metadata,
}

impl NewTimeEntry {
    pub fn new(category: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            user_id: None,
            task_id: None,
            start_time,
            end_time: None,
            duration_minutes: None,
            description: String::new(),
            category: category.into(),
            entry_type: TimeEntryType::default(),
            billable: false,
            tags: Vec::new(),
            metadata: Metadata::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeEntryUpdate {
    pub user_id: Option<Option<String>>,
    pub task_id: Option<Option<String>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<Option<DateTime<Utc>>>,
    pub duration_minutes: Option<Option<i64>>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub entry_type: Option<TimeEntryType>,
    pub billable: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Metadata>,
}

/// Whole minutes elapsed between two instants, never negative.
pub fn minutes_between(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_minutes().max(0)
}

// =============================================================================
// Notifications
// =============================================================================

/// A user-triggerable action offered by a notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub id: String,
    pub label: String,
    /// Free-form action discriminator interpreted by the caller.
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: Option<String>,
    pub notification_type: NotificationType,
    pub priority: Priority,
    pub status: NotificationStatus,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub timestamp: DateTime<Utc>,
    pub actions: Vec<NotificationAction>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: Option<String>,
    pub notification_type: NotificationType,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    /// Defaults to the creation time.
    pub timestamp: Option<DateTime<Utc>>,
    pub actions: Vec<NotificationAction>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Metadata,
}

impl NewNotification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NotificationUpdate {
    pub notification_type: Option<NotificationType>,
    pub priority: Option<Priority>,
    pub status: Option<NotificationStatus>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub read: Option<bool>,
    pub actions: Option<Vec<NotificationAction>>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub metadata: Option<Metadata>,
}

// =============================================================================
// Memories
// =============================================================================

/// Directed, weighted edge from one memory to another.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryRelationship {
    pub target_id: String,
    pub relation_type: RelationType,
    /// Edge weight in [0, 1].
    pub strength: f64,
}

impl MemoryRelationship {
    pub fn new(target_id: impl Into<String>, relation_type: RelationType, strength: f64) -> Self {
        Self {
            target_id: target_id.into(),
            relation_type,
            strength: strength.clamp(0.0, 1.0),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub memory_type: MemoryType,
    pub content: String,
    pub context: String,
    /// In [0, 1].
    pub importance: f64,
    /// In [0, 1].
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub access_count: i64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub tags: Vec<String>,
    pub relationships: Vec<MemoryRelationship>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const DEFAULT_IMPORTANCE: f64 = 0.5;
pub const DEFAULT_CONFIDENCE: f64 = 1.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewMemory {
    pub memory_type: MemoryType,
    pub content: String,
    pub context: String,
    pub importance: f64,
    pub confidence: f64,
    /// Defaults to the creation time.
    pub timestamp: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub tags: Vec<String>,
    pub relationships: Vec<MemoryRelationship>,
    pub metadata: Metadata,
}

impl NewMemory {
    pub fn new(memory_type: MemoryType, content: impl Into<String>) -> Self {
        Self {
            memory_type,
            content: content.into(),
            context: String::new(),
            importance: DEFAULT_IMPORTANCE,
            confidence: DEFAULT_CONFIDENCE,
            timestamp: None,
            source: None,
            tags: Vec::new(),
            relationships: Vec::new(),
            metadata: Metadata::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryUpdate {
    pub memory_type: Option<MemoryType>,
    pub content: Option<String>,
    pub context: Option<String>,
    pub importance: Option<f64>,
    pub confidence: Option<f64>,
    pub source: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub relationships: Option<Vec<MemoryRelationship>>,
    pub metadata: Option<Metadata>,
}

// =============================================================================
// Tests
// =============================================================================
