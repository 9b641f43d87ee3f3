//! Message payload types.

/// WebSocket data frame kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// UTF-8 text
    Text,
    /// Raw bytes
    Binary,
}

/// Message waiting in the send queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutboundMessage {
    pub(crate) payload: Vec<u8>,
    pub(crate) kind: MessageType,
    /// Submission order within the session.
    pub(crate) seq: u64,
}
