//! Replaceable application callbacks.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ErrorInfo;
use crate::message::MessageType;
use crate::state::ConnectionState;

/// Called once per received message with the payload and its frame kind.
pub type MessageCallback = Arc<dyn Fn(&[u8], MessageType) + Send + Sync>;

/// Called once per state transition. `error` is `Some` only for `Error`.
pub type StateCallback = Arc<dyn Fn(ConnectionState, Option<&ErrorInfo>) + Send + Sync>;

/// Message and state slots, each behind its own lock.
///
/// A slot lock is held only to clone or swap the `Arc`; the callback itself
/// runs unlocked so it may call back into the session.
#[derive(Default)]
pub(crate) struct CallbackSlots {
    on_message: Mutex<Option<MessageCallback>>,
    on_state: Mutex<Option<StateCallback>>,
}

impl CallbackSlots {
    pub(crate) fn set_message(&self, callback: Option<MessageCallback>) {
        *self.on_message.lock() = callback;
    }

    pub(crate) fn set_state(&self, callback: Option<StateCallback>) {
        *self.on_state.lock() = callback;
    }

    pub(crate) fn deliver_message(&self, payload: &[u8], kind: MessageType) {
        let snapshot = self.on_message.lock().clone();
        if let Some(cb) = snapshot {
            cb(payload, kind);
        }
    }

    pub(crate) fn deliver_state(&self, state: ConnectionState, error: Option<&ErrorInfo>) {
        let snapshot = self.on_state.lock().clone();
        if let Some(cb) = snapshot {
            cb(state, error);
        }
    }
}
