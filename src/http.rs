//! HTTP implementation of the Fetch and Mutation APIs.
//!
//! Endpoints (relative to the configured base URL):
//!
//! - `GET  /api/boards/{board}/items?sort=..&status=..&assignee=..`
//! - `PATCH /api/items/{id}` with `{"status": ..}` and an `Idempotency-Key`
//! - `POST /api/auth/ws-ticket` for the push channel handshake
//!
//! Responses may be bare (`[...]`, `{...}`) or wrapped (`{"items": [...]}`,
//! `{"item": {...}}`); both shapes are accepted.

#[cfg(test)]
#[path = "http_test.rs"]
mod http_test;

use async_trait::async_trait;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::{ApiError, FetchApi, FetchQuery, MutationApi};
use crate::config::ClientConfig;
use crate::item::{Status, WorkItem, WorkItemId};

const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

pub struct HttpBoardApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBoardApi {
    /// # Errors
    ///
    /// [`ApiError::HttpClientBuild`] if the session token is not a valid
    /// header value or the TLS backend fails to initialize.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.session_token {
            let cookie = HeaderValue::from_str(&format!("session_token={token}"))
                .map_err(|e| ApiError::HttpClientBuild(e.to_string()))?;
            headers.insert(COOKIE, cookie);
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ApiError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: config.base_url.trim_end_matches('/').to_owned() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Exchange the session cookie for a one-shot websocket ticket.
    ///
    /// # Errors
    ///
    /// Any transport, status, or decode failure.
    pub async fn fetch_ws_ticket(&self) -> Result<String, ApiError> {
        let request = self.http.post(self.url("/api/auth/ws-ticket")).json(&json!({}));
        let text = send(request).await?;
        parse_ticket(&text)
    }
}

#[async_trait]
impl FetchApi for HttpBoardApi {
    async fn fetch_items(&self, query: &FetchQuery) -> Result<Vec<WorkItem>, ApiError> {
        let url = self.url(&format!("/api/boards/{}/items", query.board_id));
        let text = send(self.http.get(&url).query(&query.params())).await?;
        let items = parse_items(&text)?;
        debug!(board_id = %query.board_id, count = items.len(), "board fetched");
        Ok(items)
    }
}

#[async_trait]
impl MutationApi for HttpBoardApi {
    async fn update_status(&self, id: &WorkItemId, status: Status, request_id: Uuid) -> Result<WorkItem, ApiError> {
        let request = self
            .http
            .patch(self.url(&format!("/api/items/{id}")))
            .header(IDEMPOTENCY_KEY, request_id.to_string())
            .json(&json!({ "status": status }));
        let text = send(request).await?;
        parse_item(&text)
    }
}

async fn send(request: reqwest::RequestBuilder) -> Result<String, ApiError> {
    let response = request.send().await.map_err(|e| ApiError::Transport(e.to_string()))?;
    let status = response.status();
    let text = response.text().await.map_err(|e| ApiError::Transport(e.to_string()))?;
    if !status.is_success() {
        warn!(status = status.as_u16(), "request rejected");
        return Err(ApiError::Status { status: status.as_u16(), body: text });
    }
    Ok(text)
}

// =============================================================================
// PARSING
// =============================================================================

fn decode(text: &str) -> Result<Value, ApiError> {
    serde_json::from_str(text).map_err(|e| ApiError::Decode(e.to_string()))
}

fn unwrap_field(value: Value, field: &str) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key(field) => map.remove(field).unwrap_or(Value::Null),
        other => other,
    }
}

pub(crate) fn parse_items(text: &str) -> Result<Vec<WorkItem>, ApiError> {
    let value = unwrap_field(decode(text)?, "items");
    serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
}

pub(crate) fn parse_item(text: &str) -> Result<WorkItem, ApiError> {
    let value = unwrap_field(decode(text)?, "item");
    serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
}

pub(crate) fn parse_ticket(text: &str) -> Result<String, ApiError> {
    decode(text)?
        .get("ticket")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| ApiError::Decode("missing field `ticket`".into()))
}
