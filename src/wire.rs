//! Push-channel wire model.
//!
//! Every realtime message is a frame: `{ id, parent_id, ts, board_id, from,
//! syscall, status, data }`. Item broadcasts arrive as `done` frames whose
//! `syscall` names the change and whose `data` carries the item (or, for
//! comment events, `{ "item": {...}, "comment": {...} }`).

#[cfg(test)]
#[path = "wire_test.rs"]
mod wire_test;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::item::{WorkItem, WorkItemId};
use crate::listener::{RemoteChange, RemoteEvent, RemoteEventKind};

/// Lifecycle status of a frame in a request/response exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
    Request,
    Item,
    Bulk,
    Done,
    Error,
    Cancel,
}

/// A single message on the push channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PushFrame {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Milliseconds since the Unix epoch, server clock.
    pub ts: i64,
    #[serde(default)]
    pub board_id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    pub syscall: String,
    pub status: FrameStatus,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Frame(#[from] serde_json::Error),
    #[error("frame {syscall} is missing `{field}`")]
    MissingField { syscall: String, field: &'static str },
}

impl PushFrame {
    /// A fresh outbound request frame.
    #[must_use]
    pub fn request(syscall: &str, board_id: Option<&str>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            ts: now_ms(),
            board_id: board_id.map(ToOwned::to_owned),
            from: None,
            syscall: syscall.to_owned(),
            status: FrameStatus::Request,
            data,
        }
    }

    /// Serialize for a websocket text message.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Frame`] if `data` cannot be serialized.
    pub fn to_text(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }
}

fn now_ms() -> i64 {
    let millis = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis());
    i64::try_from(millis).unwrap_or(i64::MAX)
}

/// Parse one text message into a frame.
///
/// # Errors
///
/// Returns [`WireError::Frame`] for malformed JSON.
pub fn parse_frame(text: &str) -> Result<PushFrame, WireError> {
    Ok(serde_json::from_str(text)?)
}

fn event_kind(syscall: &str) -> Option<RemoteEventKind> {
    match syscall {
        "item:updated" => Some(RemoteEventKind::Updated),
        "item:assigned" => Some(RemoteEventKind::Assigned),
        "item:status" => Some(RemoteEventKind::StatusChanged),
        "item:deleted" => Some(RemoteEventKind::Deleted),
        "comment:created" => Some(RemoteEventKind::CommentAdded),
        "comment:updated" => Some(RemoteEventKind::CommentUpdated),
        "comment:deleted" => Some(RemoteEventKind::CommentDeleted),
        _ => None,
    }
}

/// Translate a frame into a remote event. Returns `Ok(None)` for frames that
/// are not item broadcasts (other syscalls, non-`done` statuses).
///
/// # Errors
///
/// Returns [`WireError`] when an item broadcast carries an unusable payload.
pub fn decode_event(frame: &PushFrame) -> Result<Option<RemoteEvent>, WireError> {
    if frame.status != FrameStatus::Done {
        return Ok(None);
    }
    let Some(kind) = event_kind(&frame.syscall) else {
        return Ok(None);
    };

    let change = if kind == RemoteEventKind::Deleted {
        let Some(id) = frame.data.get("id").and_then(Value::as_str) else {
            return Err(WireError::MissingField { syscall: frame.syscall.clone(), field: "id" });
        };
        let ts = frame
            .data
            .get("deleted_at")
            .and_then(Value::as_i64)
            .unwrap_or(frame.ts);
        RemoteChange::Delete { id: WorkItemId::new(id), ts }
    } else {
        let payload = frame.data.get("item").unwrap_or(&frame.data);
        let mut item = WorkItem::deserialize(payload)?;
        if item.updated_at == 0 {
            item.updated_at = frame.ts;
        }
        RemoteChange::Upsert(item)
    };

    Ok(Some(RemoteEvent { kind, change }))
}
