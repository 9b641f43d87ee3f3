//! Connection configuration.

use std::time::Duration;

use crate::endpoint::WsUrl;
use crate::{Result, WsError};

/// Configuration captured by `connect`. Changing a config after `connect`
/// has no effect on the running attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// Value for `Sec-WebSocket-Protocol`, if any.
    pub subprotocol: Option<String>,
    /// Time allowed from `connect` to `Connected`.
    pub connect_timeout: Duration,
    /// Ping period while connected (zero disables).
    pub ping_interval: Duration,
    /// Retry after connection errors.
    pub auto_reconnect: bool,
    /// Delay before each retry.
    pub reconnect_delay: Duration,
    /// Retry limit (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Send queue bound (0 = unbounded).
    pub max_queued_messages: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            subprotocol: None,
            connect_timeout: Duration::from_millis(30_000),
            ping_interval: Duration::from_millis(30_000),
            auto_reconnect: false,
            reconnect_delay: Duration::from_millis(5_000),
            max_reconnect_attempts: 5,
            max_queued_messages: 0,
        }
    }
}

impl WsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = Some(subprotocol.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Enable retries with a fixed delay.
    pub fn with_auto_reconnect(mut self, delay: Duration, max_attempts: u32) -> Self {
        self.auto_reconnect = true;
        self.reconnect_delay = delay;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    pub fn with_max_queued_messages(mut self, max: usize) -> Self {
        self.max_queued_messages = max;
        self
    }

    /// Check the config and return the parsed endpoint.
    pub fn validate(&self) -> Result<WsUrl> {
        let url = WsUrl::parse(&self.url)?;

        if let Some(proto) = &self.subprotocol {
            if proto.is_empty() {
                return Err(WsError::invalid_config("empty subprotocol"));
            }
            if proto.chars().any(|c| c.is_whitespace() || c == ',' || c.is_control()) {
                return Err(WsError::invalid_config(format!("invalid subprotocol token '{proto}'")));
            }
        }

        if self.connect_timeout.is_zero() {
            return Err(WsError::invalid_config("connect_timeout must be non-zero"));
        }

        Ok(url)
    }
}
