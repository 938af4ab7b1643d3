//! Remote collaborators: the Fetch API and the Mutation API.
//!
//! The synchronization core never talks to the network itself. The driver
//! calls these traits from spawned tasks and feeds the results back in.

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::item::{Status, WorkItem, WorkItemId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Transport(String),
    #[error("server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response decode failed: {0}")]
    Decode(String),
    #[error("http client build failed: {0}")]
    HttpClientBuild(String),
}

impl ErrorCode for ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "E_API_TRANSPORT",
            Self::Status { .. } => "E_API_STATUS",
            Self::Decode(_) => "E_API_DECODE",
            Self::HttpClientBuild(_) => "E_API_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Status { status: 429 | 500..=599, .. })
    }

    fn user_visible(&self) -> bool {
        !matches!(self, Self::HttpClientBuild(_))
    }
}

/// Column ordering requested from the Fetch API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Board order: status, then position.
    #[default]
    Position,
    /// Most recently updated first.
    UpdatedDesc,
}

impl SortOrder {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::UpdatedDesc => "-updated_at",
        }
    }
}

/// Filter and sort parameters for a full fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchQuery {
    pub board_id: String,
    pub assignee: Option<String>,
    pub statuses: Vec<Status>,
    pub sort: SortOrder,
}

impl FetchQuery {
    #[must_use]
    pub fn board(board_id: impl Into<String>) -> Self {
        Self { board_id: board_id.into(), ..Self::default() }
    }

    /// Query-string pairs, omitting unset filters.
    #[must_use]
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(assignee) = &self.assignee {
            params.push(("assignee", assignee.clone()));
        }
        if !self.statuses.is_empty() {
            let joined = self.statuses.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(",");
            params.push(("status", joined));
        }
        params.push(("sort", self.sort.as_str().to_owned()));
        params
    }
}

/// Returns the full current item list; used for the initial load and resyncs.
#[async_trait]
pub trait FetchApi: Send + Sync {
    async fn fetch_items(&self, query: &FetchQuery) -> Result<Vec<WorkItem>, ApiError>;
}

/// Applies one status change and returns the canonical record.
///
/// `request_id` is stable for one logical move, so a retried call is
/// idempotent on the server.
#[async_trait]
pub trait MutationApi: Send + Sync {
    async fn update_status(&self, id: &WorkItemId, status: Status, request_id: Uuid) -> Result<WorkItem, ApiError>;
}

/// Both collaborators, as one backend handle.
pub trait BoardApi: FetchApi + MutationApi {}

impl<T: FetchApi + MutationApi> BoardApi for T {}
