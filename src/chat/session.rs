//! Session data model and its turn-level bookkeeping.
//!
//! A session is either settled (`pending` is `None`) or carries a
//! [`PendingTurn`] recording exactly how far an unfinished turn got.

use crate::textutil::clip_chars;
use crate::types::{ChatMessage, Role, ToolCall};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Longest auto-derived title, in characters.
const TITLE_MAX_CHARS: usize = 60;

/// Orchestrator state for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No turn has run yet.
    #[default]
    Idle,
    Sending,
    Resuming,
    Settled,
    /// A turn stopped early; `pending` says where.
    Interrupted,
}

impl SessionState {
    /// True while a send or resume is in flight.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Sending | Self::Resuming)
    }
}

/// Progress of an unfinished turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingTurn {
    /// Assistant message whose tool calls are being worked through. `None`
    /// means the next step is asking the model.
    pub assistant: Option<ChatMessage>,
    /// Tool-role results for calls that already finished, in call order.
    pub results: Vec<ChatMessage>,
    /// Model round-trips spent so far in this turn.
    pub iterations: usize,
}

impl PendingTurn {
    /// Calls of the pending assistant message that have no result yet.
    pub fn outstanding_calls(&self) -> Vec<ToolCall> {
        let Some(assistant) = &self.assistant else {
            return Vec::new();
        };
        assistant
            .requested_calls()
            .iter()
            .filter(|call| !self.is_completed(&call.id))
            .cloned()
            .collect()
    }

    pub fn is_completed(&self, call_id: &str) -> bool {
        self.results
            .iter()
            .any(|result| result.tool_call_id.as_deref() == Some(call_id))
    }
}

pub const MODEL_METADATA_KEY: &str = "model";

/// One conversation, persisted after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    /// Chat instance that owns this session; loads by anyone else are refused.
    pub owner: String,
    pub title: String,
    /// Free-form annotations. The chat bot records the model of the latest
    /// turn under [`MODEL_METADATA_KEY`]; callers may add their own keys.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub messages: Vec<ChatMessage>,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingTurn>,
    pub updated_at_millis: u64,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, owner: impl Into<String>, system_prompt: &str) -> Self {
        let mut messages = Vec::new();
        if !system_prompt.trim().is_empty() {
            messages.push(ChatMessage::system(system_prompt));
        }
        Self {
            id: id.into(),
            owner: owner.into(),
            title: String::new(),
            metadata: BTreeMap::new(),
            messages,
            state: SessionState::Idle,
            pending: None,
            updated_at_millis: now_unix_millis(),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.state == SessionState::Interrupted
    }

    /// Bump the last-modified timestamp.
    pub fn touch(&mut self) {
        // Strictly increasing, so two quick mutations never share a stamp.
        self.updated_at_millis = now_unix_millis().max(self.updated_at_millis + 1);
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.touch();
    }

    /// Append a user message and open a pending turn for it.
    pub fn begin_turn(&mut self, text: &str) {
        if self.title.is_empty() {
            self.title = derive_title(text);
        }
        self.messages.push(ChatMessage::user(text));
        self.pending = Some(PendingTurn::default());
        self.touch();
    }

    /// Move a pending assistant message and its results into history.
    pub fn commit_tool_round(&mut self) {
        if let Some(pending) = self.pending.as_mut() {
            if let Some(assistant) = pending.assistant.take() {
                self.messages.push(assistant);
                self.messages.append(&mut pending.results);
            }
        }
        self.touch();
    }

    /// Append the final assistant reply and settle.
    pub fn settle(&mut self, reply: ChatMessage) {
        self.messages.push(reply);
        self.pending = None;
        self.set_state(SessionState::Settled);
    }

    /// Sessions saved mid-flight (e.g. the process died) come back interrupted.
    pub fn recover_stale_state(&mut self) {
        if self.state.is_busy() {
            self.state = if self.pending.is_some() {
                SessionState::Interrupted
            } else {
                SessionState::Settled
            };
        }
        if self.state == SessionState::Interrupted && self.pending.is_none() {
            self.state = SessionState::Settled;
        }
    }

    /// Index of the last user message, if any.
    pub fn last_user_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.role == Role::User)
    }

    /// Text of the most recent assistant reply with content.
    pub fn last_reply(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && m.content.is_some())
            .and_then(|m| m.content.as_deref())
    }
}

fn derive_title(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default().trim();
    clip_chars(line, TITLE_MAX_CHARS, "...")
}

/// Current Unix timestamp in milliseconds.
pub(crate) fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
