//! In-memory transport that echoes every write back as a received message.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use tally_ws::{ConnectionId, MessageType, OpenParams, Transport, TransportEvent};

use crate::chaos::ChaosMonkey;

/// Loopback transport: `open` establishes on the next service call and each
/// successful write comes back as a `Received` event with the same kind.
#[derive(Default)]
pub struct EchoTransport {
    next_id: u64,
    active: Option<ConnectionId>,
    pending: VecDeque<TransportEvent>,
    chaos: Option<ChaosMonkey>,
    written: u64,
}

impl EchoTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route writes through a chaos monkey (failures, dropped echoes, delays).
    pub fn with_chaos(mut self, monkey: ChaosMonkey) -> Self {
        self.chaos = Some(monkey);
        self
    }

    /// Successful writes so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn owns(&self, id: ConnectionId) -> bool {
        self.active == Some(id)
    }
}

impl Transport for EchoTransport {
    fn open(&mut self, _params: &OpenParams) -> tally_ws::Result<ConnectionId> {
        self.next_id += 1;
        let id = ConnectionId::new(self.next_id);
        self.active = Some(id);
        self.pending.push_back(TransportEvent::Established(id));
        Ok(id)
    }

    fn write(&mut self, id: ConnectionId, payload: &[u8], kind: MessageType) -> io::Result<usize> {
        if !self.owns(id) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "unknown connection"));
        }

        let mut dropped = false;
        if let Some(monkey) = self.chaos.as_mut() {
            monkey.maybe_delay();
            if monkey.should_fail_write() {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected write failure"));
            }
            dropped = monkey.should_drop();
        }

        self.written += 1;
        if !dropped {
            self.pending.push_back(TransportEvent::Received {
                id,
                payload: payload.to_vec(),
                kind,
            });
        }
        Ok(payload.len())
    }

    fn request_writable(&mut self, id: ConnectionId) {
        if self.owns(id) {
            self.pending.push_back(TransportEvent::Writable(id));
        }
    }

    fn request_close(&mut self, id: ConnectionId, _code: u16, _reason: &str) {
        if self.owns(id) {
            self.pending.push_back(TransportEvent::Closed(id));
        }
    }

    fn service(
        &mut self,
        timeout: Duration,
        events: &mut Vec<TransportEvent>,
    ) -> io::Result<usize> {
        let n = self.pending.len();
        events.extend(self.pending.drain(..));
        if n == 0 && !timeout.is_zero() {
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
        }
        Ok(n)
    }

    fn destroy(&mut self, id: ConnectionId) {
        if self.owns(id) {
            self.active = None;
        }
        self.pending.retain(|e| e.id() != id);
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_ws::WsUrl;

    #[test]
    fn test_write_is_echoed() {
        let mut transport = EchoTransport::new();
        let id = transport
            .open(&OpenParams {
                url: WsUrl::parse("ws://echo").unwrap(),
                subprotocol: None,
                connect_timeout: Duration::from_secs(1),
                ping_interval: Duration::ZERO,
            })
            .unwrap();

        transport.write(id, b"\x01\x02", MessageType::Binary).unwrap();
        let mut events = Vec::new();
        transport.service(Duration::ZERO, &mut events).unwrap();

        assert_eq!(events[0], TransportEvent::Established(id));
        assert_eq!(
            events[1],
            TransportEvent::Received {
                id,
                payload: vec![1, 2],
                kind: MessageType::Binary
            }
        );
        assert_eq!(transport.written(), 1);
    }

    #[test]
    fn test_destroyed_connection_rejects_writes() {
        let mut transport = EchoTransport::new();
        let id = transport
            .open(&OpenParams {
                url: WsUrl::parse("ws://echo").unwrap(),
                subprotocol: None,
                connect_timeout: Duration::from_secs(1),
                ping_interval: Duration::ZERO,
            })
            .unwrap();
        transport.destroy(id);

        assert!(transport.write(id, b"x", MessageType::Text).is_err());
        let mut events = Vec::new();
        assert_eq!(transport.service(Duration::ZERO, &mut events).unwrap(), 0);
    }
}
