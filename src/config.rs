//! Runtime configuration.
//!
//! Timing knobs come from `TASKBOARD_*` environment variables with typed
//! defaults from [`crate::consts`]. Connection settings for the binary are
//! parsed by clap, which reads the same variables as flag fallbacks.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::time::Duration;

use clap::Parser;
use tracing::warn;

use crate::consts::{
    DEFAULT_DRAG_STALE_MS, DEFAULT_MUTATION_DEBOUNCE_MS, DEFAULT_MUTATION_TIMEOUT_MS, DEFAULT_RECONCILE_QUIET_MS,
    DEFAULT_SETTLE_MS, DEFAULT_TICK_MS,
};
use crate::error::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid arguments: {0}")]
    Args(#[from] clap::Error),
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Args(_) => "E_CONFIG_ARGS",
            Self::InvalidBaseUrl(_) => "E_CONFIG_BASE_URL",
        }
    }
}

/// Timing configuration for the synchronization core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub settle: Duration,
    pub mutation_debounce: Duration,
    pub mutation_timeout: Duration,
    pub reconcile_quiet: Duration,
    pub drag_stale: Duration,
    pub tick: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            mutation_debounce: Duration::from_millis(DEFAULT_MUTATION_DEBOUNCE_MS),
            mutation_timeout: Duration::from_millis(DEFAULT_MUTATION_TIMEOUT_MS),
            reconcile_quiet: Duration::from_millis(DEFAULT_RECONCILE_QUIET_MS),
            drag_stale: Duration::from_millis(DEFAULT_DRAG_STALE_MS),
            tick: Duration::from_millis(DEFAULT_TICK_MS),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            settle: env_millis("TASKBOARD_SETTLE_MS", DEFAULT_SETTLE_MS),
            mutation_debounce: env_millis("TASKBOARD_MUTATION_DEBOUNCE_MS", DEFAULT_MUTATION_DEBOUNCE_MS),
            mutation_timeout: env_millis("TASKBOARD_MUTATION_TIMEOUT_MS", DEFAULT_MUTATION_TIMEOUT_MS),
            reconcile_quiet: env_millis("TASKBOARD_RECONCILE_QUIET_MS", DEFAULT_RECONCILE_QUIET_MS),
            drag_stale: env_millis("TASKBOARD_DRAG_STALE_MS", DEFAULT_DRAG_STALE_MS),
            // A zero tick would make the interval panic.
            tick: env_millis("TASKBOARD_TICK_MS", DEFAULT_TICK_MS).max(Duration::from_millis(1)),
        }
    }
}

fn env_millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(env_parse(key, default))
}

/// Read `key` and parse it, falling back to `default` when unset or invalid.
pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    let Ok(raw) = std::env::var(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable environment value");
            default
        }
    }
}

/// Connection settings for the headless client.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "taskboard-sync", about = "Headless task board synchronization client")]
pub struct ClientConfig {
    #[arg(long, env = "TASKBOARD_BASE_URL", default_value = "http://127.0.0.1:3000")]
    pub base_url: String,

    #[arg(long, env = "TASKBOARD_SESSION_TOKEN")]
    pub session_token: Option<String>,

    /// Pre-issued websocket ticket; fetched from the server when absent.
    #[arg(long, env = "TASKBOARD_WS_TICKET")]
    pub ws_ticket: Option<String>,

    #[arg(long, env = "TASKBOARD_BOARD_ID")]
    pub board_id: String,

    /// Only sync items assigned to this user.
    #[arg(long, env = "TASKBOARD_ASSIGNEE")]
    pub assignee: Option<String>,

    #[arg(long, env = "TASKBOARD_REQUEST_TIMEOUT_MS", default_value_t = 10_000)]
    pub request_timeout_ms: u64,

    #[arg(long, env = "TASKBOARD_CONNECT_TIMEOUT_MS", default_value_t = 5_000)]
    pub connect_timeout_ms: u64,
}

impl ClientConfig {
    /// Build from the environment alone, ignoring process arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or the
    /// base URL is not http(s).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::try_parse_from(["taskboard-sync"])?.validated()
    }

    /// Check the parsed values and normalize the base URL.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidBaseUrl`] unless the URL is http or https.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(self.base_url));
        }
        self.base_url = self.base_url.trim_end_matches('/').to_owned();
        Ok(self)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
