//! Outbound FIFO drained one message per writable event.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::message::{MessageType, OutboundMessage};

struct Inner {
    messages: VecDeque<OutboundMessage>,
    next_seq: u64,
    /// Bumped by every `clear`.
    epoch: u64,
}

/// Why [`SendQueue::push`] refused a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushError {
    /// `limit` already reached.
    Full,
    /// The queue was cleared after the caller took its epoch.
    Stale,
}

/// Thread-safe send queue.
///
/// Producers are application threads calling `send_*`; the only consumer is
/// the polling thread. `writable_wanted` records that a writable notification
/// must be requested from the transport on the next poll; it is set at most
/// once until the poller takes it.
///
/// Producers read [`SendQueue::epoch`] before checking the connection state
/// and pass it to `push`, so a message accepted for one connection can never
/// outlive the `clear` that ends it.
pub(crate) struct SendQueue {
    inner: Mutex<Inner>,
    writable_wanted: AtomicBool,
}

impl SendQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                messages: VecDeque::new(),
                next_seq: 0,
                epoch: 0,
            }),
            writable_wanted: AtomicBool::new(false),
        }
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    /// Append to the tail and return the sequence number. Refused when
    /// `limit` (non-zero) is already reached or `epoch` is no longer current.
    pub(crate) fn push(
        &self,
        epoch: u64,
        payload: Vec<u8>,
        kind: MessageType,
        limit: usize,
    ) -> Result<u64, PushError> {
        let seq = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                return Err(PushError::Stale);
            }
            if limit > 0 && inner.messages.len() >= limit {
                return Err(PushError::Full);
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.messages.push_back(OutboundMessage { payload, kind, seq });
            seq
        };
        self.writable_wanted.store(true, Ordering::Release);
        Ok(seq)
    }

    /// Dequeue the head and report whether more messages remain.
    pub(crate) fn pop(&self) -> Option<(OutboundMessage, bool)> {
        let mut inner = self.inner.lock();
        let msg = inner.messages.pop_front()?;
        Some((msg, !inner.messages.is_empty()))
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    /// Drop everything queued, returning how many messages were discarded.
    pub(crate) fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.messages.len();
        inner.messages.clear();
        inner.epoch += 1;
        self.writable_wanted.store(false, Ordering::Release);
        dropped
    }

    /// Consume the pending writable request, if any.
    pub(crate) fn take_writable_request(&self) -> bool {
        self.writable_wanted.swap(false, Ordering::AcqRel)
    }
}
