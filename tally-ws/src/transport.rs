//! Transport adapter contract.
//!
//! A transport performs TCP/TLS, the HTTP upgrade and framing. The session
//! only sees discrete [`TransportEvent`]s produced during [`Transport::service`],
//! each tagged with the [`ConnectionId`] it belongs to.

use std::fmt;
use std::io;
use std::time::Duration;

use crate::endpoint::WsUrl;
use crate::message::MessageType;
use crate::Result;

/// Opaque handle for one transport connection. Never reused by a transport
/// instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Everything a transport needs to start a connection.
#[derive(Debug, Clone)]
pub struct OpenParams {
    pub url: WsUrl,
    pub subprotocol: Option<String>,
    pub connect_timeout: Duration,
    /// Zero disables keepalive pings.
    pub ping_interval: Duration,
}

impl OpenParams {
    pub fn tls_requested(&self) -> bool {
        self.url.is_secure()
    }
}

/// Event reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Upgrade completed, data may flow.
    Established(ConnectionId),
    /// One complete application message.
    Received {
        id: ConnectionId,
        payload: Vec<u8>,
        kind: MessageType,
    },
    /// Connection can accept another write.
    Writable(ConnectionId),
    /// Connect or runtime failure.
    ConnectError { id: ConnectionId, message: String },
    /// Connection fully closed.
    Closed(ConnectionId),
}

impl TransportEvent {
    pub fn id(&self) -> ConnectionId {
        match self {
            Self::Established(id) | Self::Writable(id) | Self::Closed(id) => *id,
            Self::Received { id, .. } | Self::ConnectError { id, .. } => *id,
        }
    }
}

/// Transport adapter driven by a session.
///
/// Only [`Transport::service`] may block, and only up to its timeout. Events
/// are appended to the caller's buffer rather than delivered through a
/// callback so the session can call `write` while handling them.
pub trait Transport: Send {
    /// Begin an asynchronous connection. Errors are immediate local failures only.
    fn open(&mut self, params: &OpenParams) -> Result<ConnectionId>;

    /// Write one message, returns bytes written.
    fn write(&mut self, id: ConnectionId, payload: &[u8], kind: MessageType) -> io::Result<usize>;

    /// Ask for a `Writable` event on a later `service` call.
    fn request_writable(&mut self, id: ConnectionId);

    /// Start the close handshake with the given code and reason.
    fn request_close(&mut self, id: ConnectionId, code: u16, reason: &str);

    /// Pump I/O for up to `timeout`, appending events. Returns events added.
    fn service(&mut self, timeout: Duration, events: &mut Vec<TransportEvent>) -> io::Result<usize>;

    /// Release everything held for `id`. Safe mid-connection and for unknown ids.
    fn destroy(&mut self, id: ConnectionId);

    /// Backend name for diagnostics.
    fn name(&self) -> &'static str {
        "custom"
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self, params: &OpenParams) -> Result<ConnectionId> {
        (**self).open(params)
    }

    fn write(&mut self, id: ConnectionId, payload: &[u8], kind: MessageType) -> io::Result<usize> {
        (**self).write(id, payload, kind)
    }

    fn request_writable(&mut self, id: ConnectionId) {
        (**self).request_writable(id)
    }

    fn request_close(&mut self, id: ConnectionId, code: u16, reason: &str) {
        (**self).request_close(id, code, reason)
    }

    fn service(
        &mut self,
        timeout: Duration,
        events: &mut Vec<TransportEvent>,
    ) -> io::Result<usize> {
        (**self).service(timeout, events)
    }

    fn destroy(&mut self, id: ConnectionId) {
        (**self).destroy(id)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
