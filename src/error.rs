//! Error taxonomy for the synchronization core.
//!
//! DESIGN
//! ======
//! Gesture-local errors (validation, duplicates) resolve silently through
//! rollback or suppression. Only remote-confirmed failures reach the user,
//! and nothing here is fatal: the worst case is a forced full resync.

#[cfg(test)]
#[path = "error_test.rs"]
mod error_test;

use crate::api::ApiError;
use crate::item::{Status, WorkItemId};

/// Grepable code and classification for errors that cross a boundary.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }

    /// Whether the rendering layer should show this error to the user.
    fn user_visible(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Drop destination is invalid or no longer mounted.
    #[error("invalid drop destination: {0}")]
    Validation(String),
    /// Transport-level failure talking to the remote authority.
    #[error("network error: {0}")]
    Network(String),
    /// The remote authority rejected the request.
    #[error("remote rejected request (status {status}): {message}")]
    Remote { status: u16, message: String },
    /// Remote state contradicts the local assumption (e.g. item deleted mid-gesture).
    #[error("item {0} changed remotely; move discarded")]
    StaleData(WorkItemId),
    /// Same move requested twice inside the debounce window.
    #[error("duplicate move of {id} to {status}")]
    DuplicateMutation { id: WorkItemId, status: Status },
    /// A different mutation for this item is still in flight.
    #[error("item {0} has a mutation in flight")]
    Busy(WorkItemId),
    /// The remote authority did not acknowledge in time.
    #[error("move of {0} timed out")]
    Timeout(WorkItemId),
    #[error("unknown item: {0}")]
    UnknownItem(WorkItemId),
    /// Operation not valid in the current drag phase.
    #[error("invalid session transition: {0}")]
    InvalidSession(&'static str),
}

impl ErrorCode for SyncError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::Network(_) => "E_NETWORK",
            Self::Remote { .. } => "E_REMOTE",
            Self::StaleData(_) => "E_STALE_DATA",
            Self::DuplicateMutation { .. } => "E_DUPLICATE_MUTATION",
            Self::Busy(_) => "E_BUSY",
            Self::Timeout(_) => "E_TIMEOUT",
            Self::UnknownItem(_) => "E_UNKNOWN_ITEM",
            Self::InvalidSession(_) => "E_INVALID_SESSION",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_) | Self::Remote { status: 429 | 500..=599, .. })
    }

    fn user_visible(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Remote { .. } | Self::Timeout(_))
    }
}

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Status { status, body } => Self::Remote { status, message: body },
            ApiError::Decode(message) => Self::Remote { status: 200, message },
            ApiError::Transport(message) | ApiError::HttpClientBuild(message) => Self::Network(message),
        }
    }
}
