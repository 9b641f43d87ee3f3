//! Test support for tally-ws.
//!
//! - [`scripted`]: transport whose events are injected by the test
//! - [`echo`]: in-memory transport that echoes every write back
//! - [`verify`]: ordering and payload checks for received messages
//! - [`chaos`]: random write failures, drops and delays

pub mod chaos;
pub mod echo;
pub mod scripted;
pub mod verify;

pub use chaos::ChaosMonkey;
pub use echo::EchoTransport;
pub use scripted::{ScriptControl, ScriptedTransport, WriteRecord};
pub use verify::{EchoVerifier, SequenceChecker};

/// Payload carrying a sequence number, e.g. `msg-7`.
pub fn seq_payload(seq: u64) -> String {
    format!("msg-{seq}")
}

/// Inverse of [`seq_payload`].
pub fn parse_seq(payload: &[u8]) -> Option<u64> {
    std::str::from_utf8(payload)
        .ok()?
        .strip_prefix("msg-")?
        .parse()
        .ok()
}
