//! tungstenite-backed transport adapter.

use std::borrow::Cow;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::frame::CloseFrame;
use tungstenite::protocol::WebSocket;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::Message;

use crate::message::MessageType;
use crate::transport::{ConnectionId, OpenParams, Transport, TransportEvent};
use crate::{Result, WsError};

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;
type HandshakeResult = std::result::Result<(Socket, TcpStream), String>;

/// How long a requested close may wait for the peer's close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

enum Phase {
    /// Handshake running on a worker thread.
    Connecting {
        rx: mpsc::Receiver<HandshakeResult>,
        close: Option<(u16, String)>,
    },
    Open {
        ws: Socket,
        /// Clone of the underlying socket, used to switch blocking mode and
        /// timeouts regardless of TLS wrapping.
        tcp: TcpStream,
        writable_requested: bool,
        closing_since: Option<Instant>,
        last_ping: Instant,
    },
}

struct Conn {
    id: ConnectionId,
    phase: Phase,
    ping_interval: Duration,
}

/// WebSocket transport over tungstenite, one connection at a time.
///
/// The TCP connect, TLS and HTTP upgrade run on a short-lived worker thread so
/// `open` never blocks. Once established the socket is serviced from
/// [`Transport::service`] on the polling thread.
pub struct WsTransport {
    next_id: u64,
    conn: Option<Conn>,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WsTransport {
    pub fn new() -> Self {
        Self { next_id: 1, conn: None }
    }

    fn conn_mut(&mut self, id: ConnectionId) -> Option<&mut Conn> {
        self.conn.as_mut().filter(|c| c.id == id)
    }
}

impl Transport for WsTransport {
    fn open(&mut self, params: &OpenParams) -> Result<ConnectionId> {
        if self.conn.is_some() {
            return Err(WsError::TransportOpen("a connection is already open".into()));
        }

        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;

        let (tx, rx) = mpsc::channel();
        let worker_params = params.clone();
        thread::Builder::new()
            .name(format!("tally-ws-connect-{}", id.raw()))
            .spawn(move || {
                // Receiver may be gone if the connection was destroyed meanwhile.
                let _ = tx.send(handshake(&worker_params));
            })
            .map_err(|e| WsError::TransportOpen(e.to_string()))?;

        trace_debug!(%id, url = %params.url, "handshake started");

        self.conn = Some(Conn {
            id,
            phase: Phase::Connecting { rx, close: None },
            ping_interval: params.ping_interval,
        });
        Ok(id)
    }

    fn write(&mut self, id: ConnectionId, payload: &[u8], kind: MessageType) -> io::Result<usize> {
        let Some(Conn { phase: Phase::Open { ws, .. }, .. }) = self.conn_mut(id) else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "connection not open"));
        };

        let msg = match kind {
            MessageType::Text => {
                let text = std::str::from_utf8(payload)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Message::Text(text.to_owned().into())
            }
            MessageType::Binary => Message::Binary(payload.to_vec().into()),
        };

        ws.send(msg).map_err(ws_to_io)?;
        Ok(payload.len())
    }

    fn request_writable(&mut self, id: ConnectionId) {
        if let Some(Conn {
            phase: Phase::Open { writable_requested, .. },
            ..
        }) = self.conn_mut(id)
        {
            *writable_requested = true;
        }
    }

    fn request_close(&mut self, id: ConnectionId, code: u16, reason: &str) {
        let Some(conn) = self.conn_mut(id) else {
            return;
        };
        match &mut conn.phase {
            Phase::Connecting { close, .. } => *close = Some((code, reason.to_string())),
            Phase::Open { ws, closing_since, .. } => {
                if closing_since.is_none() {
                    // WouldBlock here only means the frame is still buffered.
                    let _ = ws.close(Some(close_frame(code, reason)));
                    *closing_since = Some(Instant::now());
                }
            }
        }
    }

    fn service(
        &mut self,
        timeout: Duration,
        events: &mut Vec<TransportEvent>,
    ) -> io::Result<usize> {
        let before = events.len();
        let Some(conn) = self.conn.as_mut() else {
            return Ok(0);
        };
        let id = conn.id;

        let finished = match &mut conn.phase {
            Phase::Connecting { rx, close } => match rx.recv_timeout(timeout) {
                Ok(Ok((mut ws, tcp))) => {
                    let mut closing_since = None;
                    if let Some((code, reason)) = close.take() {
                        let _ = ws.close(Some(close_frame(code, &reason)));
                        closing_since = Some(Instant::now());
                    }
                    conn.phase = Phase::Open {
                        ws,
                        tcp,
                        writable_requested: false,
                        closing_since,
                        last_ping: Instant::now(),
                    };
                    events.push(TransportEvent::Established(id));
                    false
                }
                Ok(Err(message)) => {
                    events.push(TransportEvent::ConnectError { id, message });
                    true
                }
                Err(mpsc::RecvTimeoutError::Timeout) => false,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    events.push(TransportEvent::ConnectError {
                        id,
                        message: "handshake worker exited".into(),
                    });
                    true
                }
            },
            Phase::Open {
                ws,
                tcp,
                writable_requested,
                closing_since,
                last_ping,
            } => {
                if std::mem::take(writable_requested) && closing_since.is_none() {
                    events.push(TransportEvent::Writable(id));
                }

                if !conn.ping_interval.is_zero()
                    && closing_since.is_none()
                    && last_ping.elapsed() >= conn.ping_interval
                {
                    match ws.send(Message::Ping(Vec::new().into())) {
                        Ok(()) => {}
                        // Frame is buffered and goes out with the next flush.
                        Err(tungstenite::Error::Io(ref e))
                            if e.kind() == io::ErrorKind::WouldBlock => {}
                        // A dead socket surfaces on the read below.
                        Err(_e) => {
                            trace_warn!(%id, error = %_e, "keepalive ping failed");
                        }
                    }
                    *last_ping = Instant::now();
                }

                // Don't sit on the socket when a write is already waiting.
                let wait = if events.len() > before { Duration::ZERO } else { timeout };
                let finished = read_available(id, ws, tcp, wait, events)?;

                if !finished && closing_since.is_some_and(|t| t.elapsed() >= CLOSE_GRACE) {
                    trace_warn!(%id, "peer did not answer close, dropping connection");
                    events.push(TransportEvent::Closed(id));
                    true
                } else {
                    finished
                }
            }
        };

        if finished {
            self.conn = None;
        }
        Ok(events.len() - before)
    }

    fn destroy(&mut self, id: ConnectionId) {
        if self.conn.as_ref().is_some_and(|c| c.id == id) {
            trace_debug!(%id, "connection destroyed");
            self.conn = None;
        }
    }

    fn name(&self) -> &'static str {
        "tungstenite"
    }
}

/// Resolve, connect with timeout, then run the (TLS +) HTTP upgrade.
fn handshake(params: &OpenParams) -> HandshakeResult {
    let host = params.url.host();
    let port = params.url.port();

    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("failed to resolve {host}:{port}: {e}"))?;

    let mut last_err = None;
    let mut stream = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, params.connect_timeout) {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(e) => last_err = Some(e),
        }
    }
    let stream = stream.ok_or_else(|| match last_err {
        Some(e) => format!("failed to connect to {host}:{port}: {e}"),
        None => format!("no addresses for {host}:{port}"),
    })?;

    let io_err = |e: io::Error| format!("socket setup failed: {e}");
    stream.set_nodelay(true).map_err(io_err)?;
    stream.set_read_timeout(Some(params.connect_timeout)).map_err(io_err)?;
    stream.set_write_timeout(Some(params.connect_timeout)).map_err(io_err)?;
    let tcp = stream.try_clone().map_err(io_err)?;

    let mut request = params
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| format!("invalid request: {e}"))?;
    if let Some(proto) = &params.subprotocol {
        let value = HeaderValue::from_str(proto).map_err(|e| format!("invalid subprotocol: {e}"))?;
        request.headers_mut().insert("Sec-WebSocket-Protocol", value);
    }

    let (ws, _response) = tungstenite::client_tls_with_config(request, stream, None, None)
        .map_err(|e| format!("handshake failed: {e}"))?;

    tcp.set_read_timeout(None).map_err(io_err)?;
    Ok((ws, tcp))
}

/// Read every complete message available, waiting up to `wait` for the first.
/// Returns true when the connection ended.
fn read_available(
    id: ConnectionId,
    ws: &mut Socket,
    tcp: &TcpStream,
    wait: Duration,
    events: &mut Vec<TransportEvent>,
) -> io::Result<bool> {
    if wait.is_zero() {
        tcp.set_nonblocking(true)?;
    } else {
        tcp.set_nonblocking(false)?;
        tcp.set_read_timeout(Some(wait))?;
    }

    let finished = loop {
        match ws.read() {
            Ok(Message::Text(text)) => {
                events.push(TransportEvent::Received {
                    id,
                    payload: text.as_bytes().to_vec(),
                    kind: MessageType::Text,
                });
                tcp.set_nonblocking(true)?;
            }
            Ok(Message::Binary(data)) => {
                events.push(TransportEvent::Received {
                    id,
                    payload: data.to_vec(),
                    kind: MessageType::Binary,
                });
                tcp.set_nonblocking(true)?;
            }
            // Pongs are queued by tungstenite and flushed on the next read/write.
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
            // Close reply is sent by tungstenite; the next read reports ConnectionClosed.
            Ok(Message::Close(_)) => {}
            Err(tungstenite::Error::Io(ref e))
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                break false;
            }
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                events.push(TransportEvent::Closed(id));
                break true;
            }
            Err(e) => {
                events.push(TransportEvent::ConnectError {
                    id,
                    message: e.to_string(),
                });
                break true;
            }
        }
    };

    if !finished {
        // Writes from the session are done in blocking mode.
        tcp.set_nonblocking(false)?;
        tcp.set_read_timeout(None)?;
    }
    Ok(finished)
}

fn close_frame(code: u16, reason: &str) -> CloseFrame<'static> {
    CloseFrame {
        code: CloseCode::from(code),
        reason: Cow::Owned(reason.to_string()),
    }
}

fn ws_to_io(e: tungstenite::Error) -> io::Error {
    match e {
        tungstenite::Error::Io(io_err) => io_err,
        tungstenite::Error::ConnectionClosed => {
            io::Error::new(io::ErrorKind::ConnectionReset, "WebSocket connection closed")
        }
        tungstenite::Error::AlreadyClosed => {
            io::Error::new(io::ErrorKind::NotConnected, "WebSocket already closed")
        }
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}
