//! Confirmation gating for permission-bearing tool calls.
//!
//! [`ApprovalPolicy`] decides whether a call needs a human at all. When it
//! does, the orchestrator asks an [`Approver`]. [`ConfirmationGate`] is the
//! approver for frontends that answer asynchronously: each request becomes a
//! pending entry that stays until [`ConfirmationGate::resolve`] is called or
//! the waiting turn goes away.

use crate::config::ApprovalConfig;
use crate::error::ChatError;
use crate::tools::Permissions;
use crate::types::ToolCall;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::debug;

/// Per-permission-class auto-approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalPolicy {
    pub auto_read: bool,
    pub auto_write: bool,
    pub auto_delete: bool,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self::from(&ApprovalConfig::default())
    }
}

impl From<&ApprovalConfig> for ApprovalPolicy {
    fn from(config: &ApprovalConfig) -> Self {
        Self {
            auto_read: config.auto_approve_read,
            auto_write: config.auto_approve_write,
            auto_delete: config.auto_approve_delete,
        }
    }
}

impl ApprovalPolicy {
    pub fn approve_all() -> Self {
        Self {
            auto_read: true,
            auto_write: true,
            auto_delete: true,
        }
    }

    /// True when any declared permission bit is not auto-approved.
    pub fn requires_confirmation(&self, permissions: Permissions) -> bool {
        (permissions.contains(Permissions::READ) && !self.auto_read)
            || (permissions.contains(Permissions::WRITE) && !self.auto_write)
            || (permissions.contains(Permissions::DELETE) && !self.auto_delete)
    }
}

/// A tool call awaiting a decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationRequest {
    pub session_id: String,
    /// Index the requesting assistant message has (or will have) in history.
    pub message_index: usize,
    pub call: ToolCall,
    pub permissions: Permissions,
}

impl ConfirmationRequest {
    pub fn key(&self) -> GateKey {
        GateKey {
            message_index: self.message_index,
            call_id: self.call.id.clone(),
        }
    }
}

/// Gate entry key: one (message, tool-call) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GateKey {
    pub message_index: usize,
    pub call_id: String,
}

/// Answers confirmation requests.
///
/// An `Err` means the approver can no longer answer at all; the turn is
/// aborted rather than treated as a denial.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn approve(&self, request: &ConfirmationRequest) -> Result<bool, ChatError>;
}

/// Always gives the same answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticApprover(pub bool);

#[async_trait]
impl Approver for StaticApprover {
    async fn approve(&self, _request: &ConfirmationRequest) -> Result<bool, ChatError> {
        Ok(self.0)
    }
}

// ---------------------------------------------------------------------------
// ConfirmationGate
// ---------------------------------------------------------------------------

struct GateEntry {
    request: ConfirmationRequest,
    responder: oneshot::Sender<bool>,
}

/// Pending decisions resolved from outside the turn (typically a UI).
#[derive(Clone, Default)]
pub struct ConfirmationGate {
    entries: Arc<Mutex<HashMap<GateKey, GateEntry>>>,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests still waiting, oldest message first.
    pub fn pending(&self) -> Vec<ConfirmationRequest> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pending: Vec<ConfirmationRequest> =
            entries.values().map(|e| e.request.clone()).collect();
        pending.sort_by(|a, b| {
            a.message_index
                .cmp(&b.message_index)
                .then_with(|| a.call.id.cmp(&b.call.id))
        });
        pending
    }

    /// Deliver a decision. Returns false if nothing was waiting under `key`.
    pub fn resolve(&self, key: &GateKey, approved: bool) -> bool {
        let entry = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        match entry {
            Some(entry) => entry.responder.send(approved).is_ok(),
            None => false,
        }
    }

    /// Drop every pending entry; their waiters fail as unavailable.
    pub fn close(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn insert(&self, request: &ConfirmationRequest) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                request.key(),
                GateEntry {
                    request: request.clone(),
                    responder: tx,
                },
            );
        rx
    }
}

/// Removes the entry if the waiting future is dropped (e.g. the turn was
/// cancelled) before a decision arrived.
struct EntryGuard<'a> {
    gate: &'a ConfirmationGate,
    key: GateKey,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        self.gate
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[async_trait]
impl Approver for ConfirmationGate {
    async fn approve(&self, request: &ConfirmationRequest) -> Result<bool, ChatError> {
        let rx = self.insert(request);
        let _guard = EntryGuard {
            gate: self,
            key: request.key(),
        };
        debug!(call = %request.call.id, tool = %request.call.function.name, "awaiting confirmation");
        rx.await.map_err(|_| {
            ChatError::ConfirmationUnavailable("confirmation gate closed".to_string())
        })
    }
}
