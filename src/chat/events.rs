//! Turn events for frontends.
//!
//! Events are wrapped in sequence-numbered envelopes so a consumer can tell
//! the order they were produced in even after fan-out.

use super::session::SessionState;
use crate::tools::Permissions;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Something observable that happened during a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    StateChanged {
        session_id: String,
        state: SessionState,
    },
    /// Streamed assistant text, in arrival order.
    ContentDelta { text: String },
    ToolCallStarted {
        call_id: String,
        name: String,
        arguments: String,
    },
    ToolCallFinished {
        call_id: String,
        name: String,
        success: bool,
        /// Feedback text sent back to the model.
        output: String,
    },
    ConfirmationRequested {
        call_id: String,
        name: String,
        permissions: Permissions,
    },
    Persisted { session_id: String, written: bool },
    /// Persistence failed; the in-memory session keeps working.
    PersistFailed { session_id: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatEventEnvelope {
    pub seq: u64,
    pub ts_unix_ms: u64,
    pub event: ChatEvent,
}

impl ChatEventEnvelope {
    pub fn new(seq: u64, event: ChatEvent) -> Self {
        Self {
            seq,
            ts_unix_ms: now_unix_millis(),
            event,
        }
    }
}

/// Optional event sink with its own sequence counter.
#[derive(Debug, Default)]
pub(crate) struct EventEmitter {
    sink: Option<mpsc::UnboundedSender<ChatEventEnvelope>>,
    seq: u64,
}

impl EventEmitter {
    pub(crate) fn set_sink(&mut self, sink: Option<mpsc::UnboundedSender<ChatEventEnvelope>>) {
        self.sink = sink;
        self.seq = 0;
    }

    /// Send one event. Returns false when there is no live sink.
    pub(crate) fn emit(&mut self, event: ChatEvent) -> bool {
        let Some(tx) = &self.sink else {
            return false;
        };
        let envelope = ChatEventEnvelope::new(self.seq, event);
        self.seq = self.seq.saturating_add(1);
        tx.send(envelope).is_ok()
    }
}

fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelopes_are_numbered_from_zero() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut emitter = EventEmitter::default();
        assert!(!emitter.emit(ChatEvent::ContentDelta { text: "lost".into() }));

        emitter.set_sink(Some(tx));
        assert!(emitter.emit(ChatEvent::ContentDelta { text: "a".into() }));
        assert!(emitter.emit(ChatEvent::ContentDelta { text: "b".into() }));
        assert_eq!(rx.try_recv().unwrap().seq, 0);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.seq, 1);
        assert_eq!(second.event, ChatEvent::ContentDelta { text: "b".into() });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let value = serde_json::to_value(ChatEvent::StateChanged {
            session_id: "s".into(),
            state: SessionState::Interrupted,
        })
        .unwrap();
        assert_eq!(value["type"], "state_changed");
        assert_eq!(value["state"], "interrupted");
    }
}
