//! Session manager: connection state machine, send-queue drain and callback
//! delivery on top of a [`Transport`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::callbacks::{CallbackSlots, MessageCallback, StateCallback};
use crate::config::WsConfig;
use crate::endpoint::WsUrl;
use crate::error::{ErrorInfo, ERR_CONNECT, ERR_CONNECT_TIMEOUT, ERR_SERVICE};
use crate::message::MessageType;
use crate::queue::{PushError, SendQueue};
use crate::state::{AtomicState, ConnectionState};
use crate::transport::{ConnectionId, OpenParams, Transport, TransportEvent};
use crate::ws_transport::WsTransport;
use crate::{Result, WsClient, WsError, CLOSE_NORMAL};

#[derive(Debug, Clone, Copy)]
struct Active {
    id: ConnectionId,
    started: Instant,
    connect_timeout: Duration,
}

/// Transport plus the one connection id this session owns.
struct Link {
    transport: Box<dyn Transport>,
    active: Option<Active>,
}

impl Link {
    fn owns(&self, id: ConnectionId) -> bool {
        self.active.is_some_and(|a| a.id == id)
    }

    /// Destroy `id` if it is still the owned connection.
    fn release(&mut self, id: ConnectionId) {
        if self.owns(id) {
            self.transport.destroy(id);
            self.active = None;
        }
    }
}

/// Requests from application threads picked up by the poller.
#[derive(Default)]
struct Control {
    config: Option<WsConfig>,
    close_request: Option<(u16, String)>,
    reconnect_at: Option<Instant>,
    reconnect_attempts: u32,
}

/// One WebSocket connection's lifecycle and message flow.
///
/// State reads are lock-free. The send queue, each callback slot, the
/// transport link and the control block have separate locks, and none of
/// them is held while a callback runs, so callbacks may call back into the
/// session (except [`WsClient::poll`], which returns [`WsError::PollBusy`]).
///
/// Events are only processed inside `poll`; all message callbacks and the
/// asynchronous state transitions run on the polling thread. Transitions
/// caused directly by `connect`/`disconnect` are reported on the caller's
/// thread.
pub struct WsSession {
    state: AtomicState,
    queue: SendQueue,
    queue_limit: AtomicUsize,
    callbacks: CallbackSlots,
    link: Mutex<Link>,
    control: Mutex<Control>,
    poll_guard: Mutex<()>,
    transport_name: &'static str,
}

impl Default for WsSession {
    fn default() -> Self {
        Self::new(WsTransport::new())
    }
}

impl WsSession {
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        let transport_name = transport.name();
        Self {
            state: AtomicState::new(ConnectionState::Disconnected),
            queue: SendQueue::new(),
            queue_limit: AtomicUsize::new(0),
            callbacks: CallbackSlots::default(),
            link: Mutex::new(Link {
                transport: Box::new(transport),
                active: None,
            }),
            control: Mutex::new(Control::default()),
            poll_guard: Mutex::new(()),
            transport_name,
        }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport_name
    }

    /// Messages accepted by `send_*` and not yet handed to the transport.
    pub fn queued_messages(&self) -> usize {
        self.queue.len()
    }

    /// Automatic retries performed since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.control.lock().reconnect_attempts
    }

    /// Register a message callback from a closure.
    pub fn on_message<F>(&self, f: F)
    where
        F: Fn(&[u8], MessageType) + Send + Sync + 'static,
    {
        self.callbacks.set_message(Some(Arc::new(f)));
    }

    /// Register a state callback from a closure.
    pub fn on_state<F>(&self, f: F)
    where
        F: Fn(ConnectionState, Option<&ErrorInfo>) + Send + Sync + 'static,
    {
        self.callbacks.set_state(Some(Arc::new(f)));
    }

    /// Like [`WsClient::connect`] but reports why the attempt did not start.
    pub fn try_connect(&self, config: &WsConfig) -> Result<()> {
        let current = self.state.load();
        if current != ConnectionState::Disconnected {
            trace_debug!(state = %current, "connect rejected");
            return Err(WsError::AlreadyActive(current));
        }

        let url = match config.validate() {
            Ok(url) => url,
            Err(e) => {
                self.enter_error(ConnectionState::Disconnected, ErrorInfo::from(&e), false);
                return Err(e);
            }
        };

        {
            // Held across the transition: a disconnect() that sees Connecting
            // stores its close request only after this reset.
            let mut control = self.control.lock();
            if !self
                .state
                .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
            {
                return Err(WsError::AlreadyActive(self.state.load()));
            }
            control.config = Some(config.clone());
            control.close_request = None;
            control.reconnect_at = None;
            control.reconnect_attempts = 0;
        }

        self.start_attempt(config, url)
    }

    /// Like [`WsClient::send_text`] but returns the sequence number or the reason
    /// for rejection.
    pub fn try_send_text(&self, text: &str) -> Result<u64> {
        self.enqueue(text.as_bytes().to_vec(), MessageType::Text)
    }

    /// Like [`WsClient::send_binary`] but returns the sequence number or the
    /// reason for rejection.
    pub fn try_send_binary(&self, data: &[u8]) -> Result<u64> {
        self.enqueue(data.to_vec(), MessageType::Binary)
    }

    fn enqueue(&self, payload: Vec<u8>, kind: MessageType) -> Result<u64> {
        // Taken before the state check; any clear after this point refuses the push.
        let epoch = self.queue.epoch();
        let current = self.state.load();
        if current != ConnectionState::Connected {
            trace_debug!(state = %current, "send rejected");
            return Err(WsError::NotConnected(current));
        }
        let limit = self.queue_limit.load(Ordering::Relaxed);
        match self.queue.push(epoch, payload, kind, limit) {
            Ok(seq) => Ok(seq),
            Err(PushError::Full) => Err(WsError::QueueFull(limit)),
            Err(PushError::Stale) => {
                let current = self.state.load();
                trace_debug!(state = %current, "send raced connection teardown");
                Err(WsError::NotConnected(current))
            }
        }
    }

    /// Open the transport. State must already be `Connecting`.
    fn start_attempt(&self, config: &WsConfig, url: WsUrl) -> Result<()> {
        self.queue_limit
            .store(config.max_queued_messages, Ordering::Relaxed);
        trace_info!(url = %url, "connecting");
        self.callbacks.deliver_state(ConnectionState::Connecting, None);

        let params = OpenParams {
            url,
            subprotocol: config.subprotocol.clone(),
            connect_timeout: config.connect_timeout,
            ping_interval: config.ping_interval,
        };

        let opened = {
            let mut link = self.link.lock();
            let opened = link.transport.open(&params);
            if let Ok(id) = opened {
                link.active = Some(Active {
                    id,
                    started: Instant::now(),
                    connect_timeout: config.connect_timeout,
                });
            }
            opened
        };

        match opened {
            Ok(_id) => {
                trace_debug!(id = %_id, "transport opened");
                Ok(())
            }
            Err(e) => {
                // Initiation failures are never retried.
                self.enter_error(ConnectionState::Connecting, ErrorInfo::from(&e), false);
                Err(e)
            }
        }
    }

    /// Move `from -> Error`, drop the queue and report `info`. With `retry`,
    /// an auto-reconnect is scheduled when the config allows one.
    ///
    /// A `disconnect()` that got in first wins: the session ends in
    /// `Disconnected` and nothing is scheduled.
    fn enter_error(&self, from: ConnectionState, info: ErrorInfo, retry: bool) {
        {
            // disconnect() clears reconnect_at under this lock after leaving
            // Error, so a retry scheduled here cannot outlive it.
            let mut control = self.control.lock();
            if !self.state.transition(from, ConnectionState::Error) {
                drop(control);
                let now = self.state.load();
                trace_debug!(from = %from, state = %now, "error superseded");
                if from != ConnectionState::Disconnected && now == ConnectionState::Disconnecting {
                    self.finish_disconnect();
                }
                return;
            }

            let attempts = control.reconnect_attempts;
            let delay = control
                .config
                .as_ref()
                .filter(|c| {
                    retry
                        && c.auto_reconnect
                        && (c.max_reconnect_attempts == 0 || attempts < c.max_reconnect_attempts)
                })
                .map(|c| c.reconnect_delay);
            control.reconnect_at = delay.map(|d| Instant::now() + d);
            if let Some(_delay) = delay {
                trace_info!(
                    attempt = attempts + 1,
                    delay_ms = _delay.as_millis() as u64,
                    "reconnect scheduled"
                );
            }
        }

        let _dropped = self.queue.clear();
        trace_warn!(
            code = info.code,
            message = %info.message,
            dropped = _dropped,
            "connection error"
        );
        self.callbacks
            .deliver_state(ConnectionState::Error, Some(&info));
    }

    /// Error after the owned connection failed from state `from`; eligible
    /// for auto-reconnect.
    fn connection_failed(&self, from: ConnectionState, info: ErrorInfo) {
        if from == ConnectionState::Disconnecting {
            self.finish_disconnect();
        } else {
            self.enter_error(from, info, true);
        }
    }

    fn finish_disconnect(&self) {
        if self.state.swap(ConnectionState::Disconnected) == ConnectionState::Disconnected {
            return;
        }
        let _dropped = self.queue.clear();
        trace_info!(dropped = _dropped, "disconnected");
        self.callbacks
            .deliver_state(ConnectionState::Disconnected, None);
    }

    /// Run `f` against the transport if `id` is still the owned connection.
    fn with_active<R>(
        &self,
        id: ConnectionId,
        f: impl FnOnce(&mut dyn Transport) -> R,
    ) -> Option<R> {
        let mut link = self.link.lock();
        if !link.owns(id) {
            return None;
        }
        Some(f(&mut *link.transport))
    }

    /// Apply one transport event. Returns false for events of a connection
    /// this session no longer owns.
    fn dispatch(&self, event: TransportEvent) -> bool {
        let id = event.id();
        if !self.link.lock().owns(id) {
            trace_debug!(%id, "stale event ignored");
            return false;
        }

        match event {
            TransportEvent::Established(_) => self.on_established(id),
            TransportEvent::Received { payload, kind, .. } => {
                self.callbacks.deliver_message(&payload, kind);
            }
            TransportEvent::Writable(_) => self.drain_one(id),
            TransportEvent::ConnectError { message, .. } => {
                self.link.lock().release(id);
                let from = self.state.load();
                self.connection_failed(from, ErrorInfo::new(ERR_CONNECT, message));
            }
            TransportEvent::Closed(_) => {
                self.link.lock().release(id);
                if self.state.load() == ConnectionState::Connecting {
                    self.connection_failed(
                        ConnectionState::Connecting,
                        ErrorInfo::new(ERR_CONNECT, "connection closed during handshake"),
                    );
                } else {
                    self.finish_disconnect();
                }
            }
        }
        true
    }

    fn on_established(&self, id: ConnectionId) {
        if !self
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
        {
            // Disconnect was requested while connecting; wait for Closed.
            trace_debug!(%id, state = %self.state.load(), "established ignored");
            return;
        }
        self.control.lock().reconnect_attempts = 0;
        trace_info!(%id, "connected");
        self.callbacks
            .deliver_state(ConnectionState::Connected, None);

        // Sends issued from the state callback go out on the next service call.
        if self.queue.take_writable_request() {
            self.with_active(id, |t| t.request_writable(id));
        }
    }

    /// Write exactly one queued message, asking for another writable event
    /// only if more remain.
    fn drain_one(&self, id: ConnectionId) {
        if self.state.load() != ConnectionState::Connected {
            return;
        }
        let Some((msg, more)) = self.queue.pop() else {
            return;
        };

        self.with_active(id, |t| {
            match t.write(id, &msg.payload, msg.kind) {
                Ok(_n) => {
                    trace_debug!(seq = msg.seq, bytes = _n, "message written");
                }
                // Dropped, not retried; a broken connection surfaces as an event.
                Err(_e) => {
                    trace_warn!(seq = msg.seq, error = %_e, "write failed, message dropped");
                }
            }
            if more {
                t.request_writable(id);
            }
        });
    }

    /// Poll with no owned connection: wait for and run a scheduled retry.
    fn poll_idle(&self, timeout: Duration) -> Result<usize> {
        let Some(due) = self.control.lock().reconnect_at else {
            return Err(WsError::Inactive);
        };
        if self.state.load() != ConnectionState::Error {
            self.control.lock().reconnect_at = None;
            return Err(WsError::Inactive);
        }

        let now = Instant::now();
        if due > now {
            let remaining = due - now;
            thread::sleep(remaining.min(timeout));
            if remaining > timeout {
                return Ok(0);
            }
        }

        self.reconnect();
        Ok(0)
    }

    fn reconnect(&self) {
        let config = {
            let mut control = self.control.lock();
            // Cancelled by disconnect() while we slept.
            if control.reconnect_at.take().is_none() {
                return;
            }
            let Some(config) = control.config.clone() else {
                return;
            };
            control.reconnect_attempts += 1;
            control.close_request = None;
            config
        };

        if !self
            .state
            .transition(ConnectionState::Error, ConnectionState::Disconnected)
        {
            return;
        }
        self.callbacks
            .deliver_state(ConnectionState::Disconnected, None);

        let url = match config.validate() {
            Ok(url) => url,
            Err(e) => {
                self.enter_error(ConnectionState::Disconnected, ErrorInfo::from(&e), false);
                return;
            }
        };

        // The state callback may have started its own connect.
        if self
            .state
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            trace_info!(attempt = self.reconnect_attempts(), "reconnecting");
            let _ = self.start_attempt(&config, url);
        }
    }
}

impl WsClient for WsSession {
    fn connect(&self, config: &WsConfig) -> bool {
        self.try_connect(config).is_ok()
    }

    fn disconnect(&self, code: u16, reason: &str) {
        self.control.lock().reconnect_at = None;

        loop {
            let current = self.state.load();
            match current {
                ConnectionState::Disconnected | ConnectionState::Disconnecting => return,
                ConnectionState::Error => {
                    if self
                        .state
                        .transition(ConnectionState::Error, ConnectionState::Disconnected)
                    {
                        self.control.lock().reconnect_at = None;
                        self.queue.clear();
                        self.callbacks
                            .deliver_state(ConnectionState::Disconnected, None);
                        return;
                    }
                }
                ConnectionState::Connecting | ConnectionState::Connected => {
                    if self
                        .state
                        .transition(current, ConnectionState::Disconnecting)
                    {
                        self.control.lock().close_request = Some((code, reason.to_string()));
                        trace_info!(code, reason, "disconnect requested");
                        self.callbacks
                            .deliver_state(ConnectionState::Disconnecting, None);
                        return;
                    }
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.state.load() == ConnectionState::Connected
    }

    fn state(&self) -> ConnectionState {
        self.state.load()
    }

    fn send_text(&self, text: &str) -> bool {
        self.try_send_text(text).is_ok()
    }

    fn send_binary(&self, data: &[u8]) -> bool {
        self.try_send_binary(data).is_ok()
    }

    fn set_message_callback(&self, callback: Option<MessageCallback>) {
        self.callbacks.set_message(callback);
    }

    fn set_state_callback(&self, callback: Option<StateCallback>) {
        self.callbacks.set_state(callback);
    }

    fn poll(&self, timeout: Duration) -> Result<usize> {
        let Some(_guard) = self.poll_guard.try_lock() else {
            return Err(WsError::PollBusy);
        };

        let mut link = self.link.lock();
        let Some(active) = link.active else {
            drop(link);
            return self.poll_idle(timeout);
        };
        let id = active.id;
        let state = self.state.load();

        if let Some((code, reason)) = self.control.lock().close_request.take() {
            link.transport.request_close(id, code, &reason);
        }
        if self.queue.take_writable_request() && state == ConnectionState::Connected {
            link.transport.request_writable(id);
        }

        let mut wait = timeout;
        if state == ConnectionState::Connecting {
            let elapsed = active.started.elapsed();
            if elapsed >= active.connect_timeout {
                link.release(id);
                drop(link);
                self.connection_failed(
                    ConnectionState::Connecting,
                    ErrorInfo::new(
                        ERR_CONNECT_TIMEOUT,
                        format!(
                            "connect timed out after {} ms",
                            active.connect_timeout.as_millis()
                        ),
                    ),
                );
                return Ok(0);
            }
            wait = wait.min(active.connect_timeout - elapsed);
        }

        let mut events = Vec::new();
        let serviced = link.transport.service(wait, &mut events);
        drop(link);

        if let Err(e) = serviced {
            self.link.lock().release(id);
            let from = self.state.load();
            self.connection_failed(from, ErrorInfo::new(ERR_SERVICE, e.to_string()));
            return Err(e.into());
        }

        let mut processed = 0;
        for event in events {
            if self.dispatch(event) {
                processed += 1;
            }
        }
        Ok(processed)
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        let state = self.state.load();
        let link = self.link.get_mut();
        if let Some(active) = link.active.take() {
            if matches!(state, ConnectionState::Connecting | ConnectionState::Connected) {
                link.transport.request_close(active.id, CLOSE_NORMAL, "");
            }
            link.transport.destroy(active.id);
        }
        self.queue.clear();
        self.state.swap(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Default)]
    struct Calls {
        opens: u64,
        fail_writes: bool,
        writes: Vec<Vec<u8>>,
        closes: Vec<(u16, String)>,
        /// Returned by the next `service`.
        pending: Vec<TransportEvent>,
    }

    /// Minimal in-crate transport; the richer scripted transports live in
    /// tally-ws-test-support.
    #[derive(Default)]
    struct NullTransport {
        calls: Arc<Mutex<Calls>>,
        fail_open: bool,
    }

    impl Transport for NullTransport {
        fn open(&mut self, _params: &OpenParams) -> Result<ConnectionId> {
            if self.fail_open {
                return Err(WsError::TransportOpen("no sockets".into()));
            }
            let mut calls = self.calls.lock();
            calls.opens += 1;
            Ok(ConnectionId::new(calls.opens))
        }

        fn write(
            &mut self,
            _id: ConnectionId,
            payload: &[u8],
            _kind: MessageType,
        ) -> io::Result<usize> {
            let mut calls = self.calls.lock();
            if calls.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
            }
            calls.writes.push(payload.to_vec());
            Ok(payload.len())
        }

        fn request_writable(&mut self, id: ConnectionId) {
            self.calls.lock().pending.push(TransportEvent::Writable(id));
        }

        fn request_close(&mut self, _id: ConnectionId, code: u16, reason: &str) {
            self.calls.lock().closes.push((code, reason.to_string()));
        }

        fn service(
            &mut self,
            _timeout: Duration,
            events: &mut Vec<TransportEvent>,
        ) -> io::Result<usize> {
            let mut calls = self.calls.lock();
            let n = calls.pending.len();
            events.append(&mut calls.pending);
            Ok(n)
        }

        fn destroy(&mut self, _id: ConnectionId) {}
    }

    fn null_session() -> (Arc<WsSession>, Arc<Mutex<Calls>>) {
        let transport = NullTransport::default();
        let calls = Arc::clone(&transport.calls);
        (Arc::new(WsSession::new(transport)), calls)
    }

    fn inject(calls: &Mutex<Calls>, event: TransportEvent) {
        calls.lock().pending.push(event);
    }

    fn record_states(session: &WsSession) -> Arc<Mutex<Vec<ConnectionState>>> {
        let states = Arc::new(Mutex::new(Vec::new()));
        let states2 = Arc::clone(&states);
        session.on_state(move |state, _| states2.lock().push(state));
        states
    }

    #[test]
    fn test_new_session_is_disconnected() {
        let session = WsSession::new(NullTransport::default());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.is_connected());
        assert_eq!(session.queued_messages(), 0);
        assert_eq!(session.transport_name(), "custom");
    }

    #[test]
    fn test_invalid_url_never_opens_transport() {
        let (session, calls) = null_session();

        assert!(!session.connect(&WsConfig::new("invalid-url")));
        assert_eq!(session.state(), ConnectionState::Error);
        assert_eq!(calls.lock().opens, 0);
    }

    #[test]
    fn test_open_failure_reports_transport_error() {
        let session = WsSession::new(NullTransport {
            fail_open: true,
            ..Default::default()
        });
        let codes = Arc::new(Mutex::new(Vec::new()));
        let codes2 = Arc::clone(&codes);
        session.on_state(move |state, err| codes2.lock().push((state, err.map(|e| e.code))));

        let err = session.try_connect(&WsConfig::new("ws://localhost")).unwrap_err();
        assert!(matches!(err, WsError::TransportOpen(_)));
        assert_eq!(
            *codes.lock(),
            vec![
                (ConnectionState::Connecting, None),
                (ConnectionState::Error, Some(crate::ERR_TRANSPORT_OPEN)),
            ]
        );
        assert!(matches!(session.poll(Duration::ZERO), Err(WsError::Inactive)));
    }

    #[test]
    fn test_error_state_resets_through_disconnect() {
        let session = WsSession::new(NullTransport::default());
        assert!(!session.connect(&WsConfig::new("ws://")));
        assert!(!session.connect(&WsConfig::new("ws://localhost")));
        assert_eq!(session.state(), ConnectionState::Error);

        session.close();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.connect(&WsConfig::new("ws://localhost")));
        assert_eq!(session.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_poll_from_state_callback_is_rejected() {
        let session = Arc::new(WsSession::new(NullTransport::default()));
        let config = WsConfig::new("ws://localhost").with_connect_timeout(Duration::from_millis(1));
        assert!(session.connect(&config));
        thread::sleep(Duration::from_millis(5));

        let weak = Arc::downgrade(&session);
        let nested = Arc::new(Mutex::new(Vec::new()));
        let nested2 = Arc::clone(&nested);
        session.on_state(move |_, _| {
            if let Some(s) = weak.upgrade() {
                nested2.lock().push(matches!(s.poll(Duration::ZERO), Err(WsError::PollBusy)));
            }
        });

        // The connect timeout fires the Error callback from inside poll.
        assert_eq!(session.poll(Duration::ZERO).unwrap(), 0);
        assert_eq!(session.state(), ConnectionState::Error);
        assert_eq!(*nested.lock(), vec![true]);
    }

    #[test]
    fn test_failed_write_drops_only_that_message() {
        let (session, calls) = null_session();
        assert!(session.connect(&WsConfig::new("ws://localhost")));
        inject(&calls, TransportEvent::Established(ConnectionId::new(1)));
        session.poll(Duration::ZERO).unwrap();

        calls.lock().fail_writes = true;
        assert!(session.send_text("lost"));
        session.poll(Duration::ZERO).unwrap();
        assert_eq!(session.queued_messages(), 0);

        calls.lock().fail_writes = false;
        assert!(session.send_text("kept"));
        session.poll(Duration::ZERO).unwrap();

        assert!(session.is_connected());
        assert_eq!(calls.lock().writes, vec![b"kept".to_vec()]);
    }

    #[test]
    fn test_connect_publishes_connecting_only_after_reset() {
        let (session, calls) = null_session();

        let control = session.control.lock();
        let connecting = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.connect(&WsConfig::new("ws://localhost")))
        };
        thread::sleep(Duration::from_millis(50));
        // A disconnect() now would find nothing to cancel.
        assert_eq!(session.state(), ConnectionState::Disconnected);
        drop(control);
        assert!(connecting.join().unwrap());

        // So the close request stored after Connecting survives and is forwarded.
        session.disconnect(CLOSE_NORMAL, "bye");
        session.poll(Duration::ZERO).unwrap();
        assert_eq!(calls.lock().closes, vec![(CLOSE_NORMAL, "bye".to_string())]);

        inject(&calls, TransportEvent::Closed(ConnectionId::new(1)));
        session.poll(Duration::ZERO).unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_during_connect_timeout_wins_over_error() {
        let (session, calls) = null_session();
        let states = record_states(&session);
        let config = WsConfig::new("ws://localhost")
            .with_connect_timeout(Duration::from_millis(1))
            .with_auto_reconnect(Duration::ZERO, 0);
        assert!(session.connect(&config));
        thread::sleep(Duration::from_millis(5));

        // Park the poller after it has read Connecting, before the timeout fires.
        let mut control = session.control.lock();
        let poller = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.poll(Duration::ZERO))
        };
        thread::sleep(Duration::from_millis(50));

        // What disconnect() does from another thread in that window.
        assert!(session
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Disconnecting));
        control.reconnect_at = None;
        control.close_request = Some((CLOSE_NORMAL, String::new()));
        drop(control);

        assert_eq!(poller.join().unwrap().unwrap(), 0);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.control.lock().reconnect_at.is_none());
        assert!(matches!(session.poll(Duration::ZERO), Err(WsError::Inactive)));
        assert_eq!(calls.lock().opens, 1);
        assert_eq!(
            *states.lock(),
            vec![ConnectionState::Connecting, ConnectionState::Disconnected]
        );
    }

    #[test]
    fn test_send_racing_teardown_never_reaches_next_connection() {
        let (session, calls) = null_session();
        let config = WsConfig::new("ws://localhost");
        assert!(session.connect(&config));
        inject(&calls, TransportEvent::Established(ConnectionId::new(1)));
        session.poll(Duration::ZERO).unwrap();
        assert!(session.is_connected());

        // A sender that passed the Connected check just before the failure.
        let epoch = session.queue.epoch();
        inject(
            &calls,
            TransportEvent::ConnectError {
                id: ConnectionId::new(1),
                message: "reset by peer".into(),
            },
        );
        session.poll(Duration::ZERO).unwrap();
        assert_eq!(session.state(), ConnectionState::Error);
        assert_eq!(
            session.queue.push(epoch, b"stale".to_vec(), MessageType::Text, 0),
            Err(PushError::Stale)
        );

        session.close();
        assert!(session.connect(&config));
        inject(&calls, TransportEvent::Established(ConnectionId::new(2)));
        session.poll(Duration::ZERO).unwrap();
        assert!(session.send_text("fresh"));
        session.poll(Duration::ZERO).unwrap();

        assert_eq!(calls.lock().writes, vec![b"fresh".to_vec()]);
        assert_eq!(session.queued_messages(), 0);
    }
}
