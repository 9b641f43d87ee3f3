//! Transport driven entirely by the test.
//!
//! [`ScriptedTransport`] goes into the session; the paired [`ScriptControl`]
//! stays with the test to inject events and inspect every call the session
//! made.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tally_ws::{ConnectionId, MessageType, OpenParams, Transport, TransportEvent, WsError};

/// One `write` call as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub id: ConnectionId,
    pub payload: Vec<u8>,
    pub kind: MessageType,
}

impl WriteRecord {
    pub fn text(&self) -> Option<&str> {
        match self.kind {
            MessageType::Text => std::str::from_utf8(&self.payload).ok(),
            MessageType::Binary => None,
        }
    }
}

struct Shared {
    next_id: u64,
    pending: VecDeque<TransportEvent>,
    opens: Vec<OpenParams>,
    writes: Vec<WriteRecord>,
    writable_requests: Vec<ConnectionId>,
    close_requests: Vec<(ConnectionId, u16, String)>,
    destroyed: Vec<ConnectionId>,
    fail_next_open: Option<String>,
    fail_next_service: Option<String>,
    fail_writes: bool,
    auto_writable: bool,
    auto_close: bool,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            next_id: 0,
            pending: VecDeque::new(),
            opens: Vec::new(),
            writes: Vec::new(),
            writable_requests: Vec::new(),
            close_requests: Vec::new(),
            destroyed: Vec::new(),
            fail_next_open: None,
            fail_next_service: None,
            fail_writes: false,
            auto_writable: true,
            auto_close: true,
        }
    }
}

/// Transport half handed to the session.
pub struct ScriptedTransport {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedTransport {
    pub fn new() -> (Self, ScriptControl) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            ScriptControl { shared },
        )
    }
}

impl Transport for ScriptedTransport {
    fn open(&mut self, params: &OpenParams) -> tally_ws::Result<ConnectionId> {
        let mut shared = self.shared.lock();
        if let Some(reason) = shared.fail_next_open.take() {
            return Err(WsError::TransportOpen(reason));
        }
        shared.next_id += 1;
        shared.opens.push(params.clone());
        Ok(ConnectionId::new(shared.next_id))
    }

    fn write(&mut self, id: ConnectionId, payload: &[u8], kind: MessageType) -> io::Result<usize> {
        let mut shared = self.shared.lock();
        shared.writes.push(WriteRecord {
            id,
            payload: payload.to_vec(),
            kind,
        });
        if shared.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted write failure"));
        }
        Ok(payload.len())
    }

    fn request_writable(&mut self, id: ConnectionId) {
        let mut shared = self.shared.lock();
        shared.writable_requests.push(id);
        if shared.auto_writable {
            shared.pending.push_back(TransportEvent::Writable(id));
        }
    }

    fn request_close(&mut self, id: ConnectionId, code: u16, reason: &str) {
        let mut shared = self.shared.lock();
        shared.close_requests.push((id, code, reason.to_string()));
        if shared.auto_close {
            shared.pending.push_back(TransportEvent::Closed(id));
        }
    }

    fn service(
        &mut self,
        timeout: Duration,
        events: &mut Vec<TransportEvent>,
    ) -> io::Result<usize> {
        let mut shared = self.shared.lock();
        if let Some(reason) = shared.fail_next_service.take() {
            return Err(io::Error::other(reason));
        }
        let n = shared.pending.len();
        events.extend(shared.pending.drain(..));
        drop(shared);

        if n == 0 && !timeout.is_zero() {
            std::thread::sleep(timeout.min(Duration::from_millis(2)));
        }
        Ok(n)
    }

    fn destroy(&mut self, id: ConnectionId) {
        self.shared.lock().destroyed.push(id);
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Test half: injects events and records what the session asked for.
#[derive(Clone)]
pub struct ScriptControl {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptControl {
    /// Id returned by the most recent successful `open`.
    pub fn last_id(&self) -> Option<ConnectionId> {
        let shared = self.shared.lock();
        (shared.next_id > 0).then(|| ConnectionId::new(shared.next_id))
    }

    fn current(&self) -> ConnectionId {
        self.last_id().unwrap_or(ConnectionId::new(0))
    }

    pub fn push(&self, event: TransportEvent) {
        self.shared.lock().pending.push_back(event);
    }

    pub fn establish(&self) {
        self.push(TransportEvent::Established(self.current()));
    }

    pub fn receive_text(&self, text: &str) {
        self.push(TransportEvent::Received {
            id: self.current(),
            payload: text.as_bytes().to_vec(),
            kind: MessageType::Text,
        });
    }

    pub fn receive_binary(&self, data: &[u8]) {
        self.push(TransportEvent::Received {
            id: self.current(),
            payload: data.to_vec(),
            kind: MessageType::Binary,
        });
    }

    pub fn connect_error(&self, message: &str) {
        self.push(TransportEvent::ConnectError {
            id: self.current(),
            message: message.to_string(),
        });
    }

    /// Peer-initiated close of the current connection.
    pub fn close_from_peer(&self) {
        self.push(TransportEvent::Closed(self.current()));
    }

    pub fn fail_next_open(&self, reason: &str) {
        self.shared.lock().fail_next_open = Some(reason.to_string());
    }

    pub fn fail_next_service(&self, reason: &str) {
        self.shared.lock().fail_next_service = Some(reason.to_string());
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.lock().fail_writes = fail;
    }

    /// When off, `request_writable` is recorded but no `Writable` event follows.
    pub fn set_auto_writable(&self, on: bool) {
        self.shared.lock().auto_writable = on;
    }

    /// When off, `request_close` is recorded but no `Closed` event follows.
    pub fn set_auto_close(&self, on: bool) {
        self.shared.lock().auto_close = on;
    }

    pub fn opens(&self) -> Vec<OpenParams> {
        self.shared.lock().opens.clone()
    }

    pub fn open_count(&self) -> usize {
        self.shared.lock().opens.len()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.shared.lock().writes.clone()
    }

    pub fn written_texts(&self) -> Vec<String> {
        self.shared
            .lock()
            .writes
            .iter()
            .filter_map(|w| w.text().map(str::to_owned))
            .collect()
    }

    pub fn writable_requests(&self) -> usize {
        self.shared.lock().writable_requests.len()
    }

    pub fn close_requests(&self) -> Vec<(ConnectionId, u16, String)> {
        self.shared.lock().close_requests.clone()
    }

    pub fn destroyed(&self) -> Vec<ConnectionId> {
        self.shared.lock().destroyed.clone()
    }

    pub fn pending_events(&self) -> usize {
        self.shared.lock().pending.len()
    }
}
