//! # tally-ws
//!
//! WebSocket client session manager.
//!
//! ## Features
//!
//! - **State machine**: `Disconnected → Connecting → Connected → Disconnecting`,
//!   with `Error` reported through the state callback
//! - **Ordered sends**: FIFO queue drained one message per writable event
//! - **Pluggable transport**: [`Transport`] trait, tungstenite-backed [`WsTransport`] by default
//! - **Cooperative**: all I/O and callbacks happen inside [`WsClient::poll`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tally_ws::{create_client, MessageType, WsClient, WsConfig};
//!
//! let client = create_client();
//! client.set_message_callback(Some(std::sync::Arc::new(|data: &[u8], kind: MessageType| {
//!     println!("{kind:?}: {}", String::from_utf8_lossy(data));
//! })));
//!
//! if client.connect(&WsConfig::new("ws://127.0.0.1:9000")) {
//!     while !client.is_connected() {
//!         if client.poll(Duration::from_millis(100)).is_err() {
//!             break;
//!         }
//!     }
//!     client.send_text("hello");
//!     let _ = client.poll(Duration::from_millis(100));
//!     client.close();
//! }
//! ```

// Tracing macros - no-op when feature disabled
#[cfg(feature = "tracing")]
macro_rules! trace_debug { ($($arg:tt)*) => { tracing::debug!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug { ($($arg:tt)*) => {} }

#[cfg(feature = "tracing")]
macro_rules! trace_info { ($($arg:tt)*) => { tracing::info!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_info { ($($arg:tt)*) => {} }

#[cfg(feature = "tracing")]
macro_rules! trace_warn { ($($arg:tt)*) => { tracing::warn!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn { ($($arg:tt)*) => {} }

mod callbacks;
mod config;
mod endpoint;
mod error;
mod message;
mod queue;
mod session;
mod state;
pub mod transport;
mod ws_transport;

use std::time::Duration;

pub use callbacks::{MessageCallback, StateCallback};
pub use config::WsConfig;
pub use endpoint::{WsUrl, DEFAULT_WSS_PORT, DEFAULT_WS_PORT};
pub use error::{
    ErrorInfo, Result, WsError, ERR_CONNECT, ERR_CONNECT_TIMEOUT, ERR_INVALID_CONFIG, ERR_SERVICE,
    ERR_TRANSPORT_OPEN,
};
pub use message::MessageType;
pub use session::WsSession;
pub use state::ConnectionState;
pub use transport::{ConnectionId, OpenParams, Transport, TransportEvent};
pub use ws_transport::WsTransport;

/// Close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Application-facing client surface.
///
/// `connect` and `send_*` only report whether work was accepted; outcomes are
/// delivered through the state and message callbacks during [`poll`](Self::poll).
pub trait WsClient: Send + Sync {
    /// Start a connection attempt. False on misuse or immediate failure.
    fn connect(&self, config: &WsConfig) -> bool;

    /// Request a close handshake. No-op while disconnected.
    fn disconnect(&self, code: u16, reason: &str);

    /// Normal closure with no reason.
    fn close(&self) {
        self.disconnect(CLOSE_NORMAL, "");
    }

    fn is_connected(&self) -> bool;

    fn state(&self) -> ConnectionState;

    /// Queue a text message. False unless connected.
    fn send_text(&self, text: &str) -> bool;

    /// Queue a binary message. False unless connected.
    fn send_binary(&self, data: &[u8]) -> bool;

    fn set_message_callback(&self, callback: Option<MessageCallback>);

    fn set_state_callback(&self, callback: Option<StateCallback>);

    /// Service the transport for up to `timeout`, returns events processed.
    fn poll(&self, timeout: Duration) -> Result<usize>;
}

/// Client backed by the default [`WsTransport`].
pub fn create_client() -> Box<dyn WsClient> {
    Box::new(WsSession::new(WsTransport::new()))
}

/// Crate and transport backend version, e.g. `tally-ws 0.1.0-preview (tungstenite)`.
pub fn library_version() -> String {
    format!("tally-ws {} ({})", env!("CARGO_PKG_VERSION"), WsTransport::new().name())
}
