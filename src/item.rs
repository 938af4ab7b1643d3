//! Data model: work items, status columns, and typed metadata access.
//!
//! Items arrive from the Fetch API and the push channel as JSON. The
//! synchronization core never creates or destroys items; it only repositions
//! and re-statuses them. `Status` is a fixed, ordered set of columns.

#[cfg(test)]
#[path = "item_test.rs"]
mod item_test;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Opaque work item identity (e.g. `"T-101"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(String);

impl WorkItemId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkItemId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Workflow column. Declaration order is the left-to-right board order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Todo,
    InProgress,
    Review,
    Done,
}

impl Status {
    /// Every column, in board order.
    pub const ALL: [Status; 4] = [Self::Todo, Self::InProgress, Self::Review, Self::Done];

    /// Zero-based column ordinal.
    #[must_use]
    pub fn ordinal(self) -> usize {
        match self {
            Self::Todo => 0,
            Self::InProgress => 1,
            Self::Review => 2,
            Self::Done => 3,
        }
    }

    /// Canonical wire spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for Status {
    type Err = UnknownStatus;

    /// Lenient parse: case-insensitive, with `-`, space and `_` treated alike,
    /// so the server's `"IN_PROGRESS"` and a user's `"in-progress"` agree.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized: String = raw
            .trim()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c.to_ascii_lowercase() })
            .collect();
        match normalized.as_str() {
            "todo" | "to_do" => Ok(Self::Todo),
            "in_progress" | "inprogress" | "doing" => Ok(Self::InProgress),
            "review" | "in_review" => Ok(Self::Review),
            "done" | "complete" | "completed" => Ok(Self::Done),
            _ => Err(UnknownStatus(raw.to_owned())),
        }
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A column position: which column, and where inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub status: Status,
    pub index: usize,
}

impl Slot {
    #[must_use]
    pub fn new(status: Status, index: usize) -> Self {
        Self { status, index }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.status, self.index)
    }
}

/// A work item as stored in the board and on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub status: Status,
    /// Index within its column. Authoritative only after the store has placed it.
    #[serde(default)]
    pub position: usize,
    #[serde(default)]
    pub assignee: Option<String>,
    /// Server-side edit counter.
    #[serde(default)]
    pub version: i64,
    /// Last server modification, milliseconds since the Unix epoch.
    #[serde(default)]
    pub updated_at: i64,
    /// Free-form per-item properties (title, labels, comment count, ...).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl WorkItem {
    /// Whether `self` is at least as new as `other` by server clock, falling
    /// back to the version counter when timestamps tie.
    #[must_use]
    pub fn supersedes(&self, other: &WorkItem) -> bool {
        (self.updated_at, self.version) >= (other.updated_at, other.version)
    }

    #[must_use]
    pub fn meta(&self) -> Metadata<'_> {
        Metadata::new(&self.metadata)
    }
}

/// Typed access to common fields of `WorkItem.metadata`.
pub struct Metadata<'a> {
    value: &'a serde_json::Value,
}

impl<'a> Metadata<'a> {
    #[must_use]
    pub fn new(value: &'a serde_json::Value) -> Self {
        Self { value }
    }

    /// Card title. Empty string when absent.
    #[must_use]
    pub fn title(&self) -> &'a str {
        self.value
            .get("title")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
    }

    /// Label names; non-string entries are skipped.
    #[must_use]
    pub fn labels(&self) -> Vec<&'a str> {
        self.value
            .get("labels")
            .and_then(serde_json::Value::as_array)
            .map(|labels| labels.iter().filter_map(serde_json::Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Number of comments attached. Defaults to `0`.
    #[must_use]
    pub fn comment_count(&self) -> u64 {
        self.value
            .get("comment_count")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0)
    }
}
