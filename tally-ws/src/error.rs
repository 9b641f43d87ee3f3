//! Error types for tally-ws.

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WsError>;

/// Configuration rejected before any transport call.
pub const ERR_INVALID_CONFIG: i32 = -1;
/// Transport refused to start a connection.
pub const ERR_TRANSPORT_OPEN: i32 = -2;
/// Transport reported a DNS/TCP/TLS/handshake or runtime failure.
pub const ERR_CONNECT: i32 = -3;
/// Connection did not establish within `WsConfig::connect_timeout`.
pub const ERR_CONNECT_TIMEOUT: i32 = -4;
/// Transport `service` call failed.
pub const ERR_SERVICE: i32 = -5;

#[derive(Error, Debug)]
pub enum WsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Not connected (state: {0})")]
    NotConnected(crate::ConnectionState),

    #[error("Connection attempt already active (state: {0})")]
    AlreadyActive(crate::ConnectionState),

    #[error("No active connection to service")]
    Inactive,

    #[error("Poll already running")]
    PollBusy,

    #[error("Transport refused to open: {0}")]
    TransportOpen(String),

    #[error("Send queue full ({0} messages)")]
    QueueFull(usize),
}

impl WsError {
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl(url.into())
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Error code reported through [`ErrorInfo`] when this error ends a connection attempt.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidUrl(_) | Self::InvalidConfig(_) => ERR_INVALID_CONFIG,
            Self::TransportOpen(_) => ERR_TRANSPORT_OPEN,
            Self::Io(_) => ERR_SERVICE,
            _ => ERR_CONNECT,
        }
    }
}

/// Details attached to a transition into `ConnectionState::Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: i32,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&WsError> for ErrorInfo {
    fn from(err: &WsError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}
