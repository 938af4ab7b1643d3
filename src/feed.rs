//! Push feed: websocket subscription to one board's item broadcasts.
//!
//! DESIGN
//! ======
//! The feed owns the connection lifecycle and nothing else. It obtains a
//! one-shot ticket, connects, joins the board, and forwards decoded item
//! events over an mpsc channel. On disconnect it reconnects with exponential
//! back-off (1s doubling to 10s, plus jitter) and reports `Connected {
//! resumed: true }` so the consumer can force a resync; events are
//! at-most-once and anything sent while disconnected is lost.
//!
//! ERROR HANDLING
//! ==============
//! Malformed frames are logged and skipped. The loop exits only when the
//! receiving side of the channel is dropped.

#[cfg(test)]
#[path = "feed_test.rs"]
mod feed_test;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::config::ClientConfig;
use crate::error::ErrorCode;
use crate::http::HttpBoardApi;
use crate::listener::RemoteEvent;
use crate::wire::{FrameStatus, PushFrame, WireError, decode_event, parse_frame};

const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 10_000;
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("websocket ticket request failed: {0}")]
    Ticket(#[from] ApiError),
    #[error("websocket connect failed: {0}")]
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket closed")]
    Closed,
    #[error("join rejected: {0}")]
    JoinRejected(String),
    #[error("timed out joining board")]
    Timeout,
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl ErrorCode for FeedError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidBaseUrl(_) => "E_FEED_BASE_URL",
            Self::Ticket(_) => "E_FEED_TICKET",
            Self::Connect(_) => "E_FEED_CONNECT",
            Self::Closed => "E_FEED_CLOSED",
            Self::JoinRejected(_) => "E_FEED_JOIN",
            Self::Timeout => "E_FEED_TIMEOUT",
            Self::Wire(_) => "E_FEED_WIRE",
        }
    }

    fn retryable(&self) -> bool {
        !matches!(self, Self::InvalidBaseUrl(_))
    }
}

/// What the feed reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Joined the board. `resumed` is set after a reconnect.
    Connected { resumed: bool },
    Remote(RemoteEvent),
    Disconnected,
}

/// Convert the HTTP base URL to the websocket endpoint.
///
/// # Errors
///
/// [`FeedError::InvalidBaseUrl`] unless the URL is http or https.
pub fn ws_url(base_url: &str, ticket: &str) -> Result<String, FeedError> {
    let base_url = base_url.trim_end_matches('/');
    if let Some(rest) = base_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/api/ws?ticket={ticket}"));
    }
    if let Some(rest) = base_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/api/ws?ticket={ticket}"));
    }
    Err(FeedError::InvalidBaseUrl(base_url.to_owned()))
}

/// Exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    current_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { current_ms: INITIAL_BACKOFF_MS }
    }
}

impl Backoff {
    /// The delay before the next attempt, without jitter. Doubles each call.
    pub fn next_base(&mut self) -> Duration {
        let delay = self.current_ms;
        self.current_ms = (self.current_ms * 2).min(MAX_BACKOFF_MS);
        Duration::from_millis(delay)
    }

    /// [`Self::next_base`] plus up to 25% random jitter.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next_base();
        let spread = u64::try_from(base.as_millis() / 4).unwrap_or(0);
        base + Duration::from_millis(rand::rng().random_range(0..=spread))
    }

    pub fn reset(&mut self) {
        self.current_ms = INITIAL_BACKOFF_MS;
    }
}

/// Decode one text message into an event for `board_id`, if it is one.
pub(crate) fn handle_text(text: &str, board_id: &str) -> Option<RemoteEvent> {
    let frame = match parse_frame(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(%err, "dropping malformed frame");
            return None;
        }
    };
    if frame.board_id.as_deref().is_some_and(|b| b != board_id) {
        return None;
    }
    match decode_event(&frame) {
        Ok(event) => event,
        Err(err) => {
            warn!(syscall = %frame.syscall, %err, "dropping undecodable item frame");
            None
        }
    }
}

pub struct PushFeed {
    api: Arc<HttpBoardApi>,
    base_url: String,
    board_id: String,
    preset_ticket: Option<String>,
}

impl PushFeed {
    #[must_use]
    pub fn new(config: &ClientConfig, api: Arc<HttpBoardApi>) -> Self {
        Self {
            api,
            base_url: config.base_url.clone(),
            board_id: config.board_id.clone(),
            preset_ticket: config.ws_ticket.clone(),
        }
    }

    /// Connection loop. Returns when `tx` is closed.
    pub async fn run(mut self, tx: mpsc::Sender<FeedEvent>) {
        let mut backoff = Backoff::default();
        let mut resumed = false;
        loop {
            match self.connect_and_run(&tx, resumed, &mut backoff).await {
                Ok(()) => info!(board_id = %self.board_id, "push feed closed"),
                Err(FeedError::InvalidBaseUrl(url)) => {
                    warn!(%url, "push feed disabled: invalid base URL");
                    return;
                }
                Err(err) => warn!(board_id = %self.board_id, %err, code = err.error_code(), "push feed error"),
            }
            if tx.is_closed() || tx.send(FeedEvent::Disconnected).await.is_err() {
                return;
            }
            resumed = true;
            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis(), "push feed reconnecting");
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_and_run(
        &mut self,
        tx: &mpsc::Sender<FeedEvent>,
        resumed: bool,
        backoff: &mut Backoff,
    ) -> Result<(), FeedError> {
        let ticket = match self.preset_ticket.take() {
            Some(ticket) => ticket,
            None => self.api.fetch_ws_ticket().await?,
        };
        let url = ws_url(&self.base_url, &ticket)?;
        let (mut stream, _) = connect_async(url).await.map_err(|e| FeedError::Connect(Box::new(e)))?;

        let join = PushFrame::request("board:join", Some(&self.board_id), Value::Object(Map::new()));
        stream.send(Message::Text(join.to_text()?.into())).await.map_err(|e| FeedError::Connect(Box::new(e)))?;
        tokio::time::timeout(JOIN_TIMEOUT, await_join(&mut stream, &join.id))
            .await
            .map_err(|_| FeedError::Timeout)??;

        info!(board_id = %self.board_id, resumed, "push feed joined");
        backoff.reset();
        if tx.send(FeedEvent::Connected { resumed }).await.is_err() {
            return Ok(());
        }

        while let Some(message) = stream.next().await {
            match message.map_err(|e| FeedError::Connect(Box::new(e)))? {
                Message::Text(text) => {
                    let Some(event) = handle_text(text.as_str(), &self.board_id) else {
                        continue;
                    };
                    if tx.send(FeedEvent::Remote(event)).await.is_err() {
                        return Ok(());
                    }
                }
                Message::Close(_) => return Ok(()),
                _ => {}
            }
        }
        Err(FeedError::Closed)
    }
}

async fn await_join<S>(stream: &mut S, join_id: &str) -> Result<(), FeedError>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        let Message::Text(text) = message.map_err(|e| FeedError::Connect(Box::new(e)))? else {
            continue;
        };
        let frame = parse_frame(text.as_str())?;
        if frame.parent_id.as_deref() != Some(join_id) {
            continue;
        }
        match frame.status {
            FrameStatus::Done => return Ok(()),
            FrameStatus::Error => return Err(FeedError::JoinRejected(frame.data.to_string())),
            _ => {}
        }
    }
    Err(FeedError::Closed)
}
