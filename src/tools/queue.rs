//! Single-flight tool execution queue.
//!
//! Items run strictly in arrival order, one at a time. Enqueueing onto an
//! idle queue spawns exactly one consumer task; the consumer exits once the
//! queue is empty. The head item stays in the queue while it runs so
//! inspectors can see the current item without it losing its position.
//!
//! Cancellation is cooperative. A cancelled token or a busy environment
//! discards everything still waiting; a running body is never aborted, but no
//! further item is scheduled after it.

use super::{ParamMap, ScratchContext, Tool, ToolContext, ToolRegistry};
use crate::error::ToolError;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the lifecycle event channel; slow subscribers observe `Lagged`.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Host state the scheduler consults before every dequeue.
pub trait Environment: Send + Sync {
    /// True while the host cannot safely run tools (mid-compile, mid-playback).
    fn is_busy(&self) -> bool;
}

/// Environment that is never busy.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleEnvironment;

impl Environment for IdleEnvironment {
    fn is_busy(&self) -> bool {
        false
    }
}

/// Lifecycle state of a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One scheduled tool invocation.
#[derive(Debug, Clone)]
pub struct ToolExecutionItem {
    pub id: u64,
    pub tool_name: String,
    pub params: ParamMap,
    pub status: ItemStatus,
    /// Success payload; set only when `status == Completed`.
    pub result: Option<Value>,
    /// Failure cause; set only when `status` is `Failed` or `Cancelled`.
    pub error: Option<ToolError>,
}

/// Inspection view of a queued item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemSnapshot {
    pub id: u64,
    pub tool_name: String,
    pub status: ItemStatus,
}

/// Lifecycle events raised by the consumer, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Started { id: u64, tool: String },
    Completed { id: u64, tool: String },
    Failed { id: u64, tool: String, error: String },
    Cancelled { id: u64, tool: String },
}

struct QueueEntry {
    item: ToolExecutionItem,
    tool: Arc<dyn Tool>,
    /// Taken by the consumer when the item starts running.
    responder: Option<oneshot::Sender<ToolExecutionItem>>,
}

struct QueueState {
    entries: VecDeque<QueueEntry>,
    /// True while a consumer task owns the queue.
    draining: bool,
    /// Bumped by `clear()`; a consumer from an older generation stops.
    generation: u64,
    cancel: CancellationToken,
}

struct Shared {
    state: Mutex<QueueState>,
    /// Held by a consumer while it drains, so a consumer superseded by
    /// `clear()` finishes its running body before the next one starts.
    exec_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<QueueEvent>,
    environment: Arc<dyn Environment>,
    scratch: ScratchContext,
    registry: ToolRegistry,
    next_id: AtomicU64,
}

/// Serialized FIFO scheduler for tool calls.
#[derive(Clone)]
pub struct ToolExecutionQueue {
    shared: Arc<Shared>,
}

impl ToolExecutionQueue {
    pub fn new(registry: ToolRegistry, scratch: ScratchContext) -> Self {
        Self::with_environment(registry, scratch, Arc::new(IdleEnvironment))
    }

    pub fn with_environment(
        registry: ToolRegistry,
        scratch: ScratchContext,
        environment: Arc<dyn Environment>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    entries: VecDeque::new(),
                    draining: false,
                    generation: 0,
                    cancel: CancellationToken::new(),
                }),
                exec_lock: tokio::sync::Mutex::new(()),
                events,
                environment,
                scratch,
                registry,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Append an item; never blocks. Returns the item id and a receiver for
    /// its terminal state.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(
        &self,
        tool: Arc<dyn Tool>,
        params: ParamMap,
    ) -> (u64, oneshot::Receiver<ToolExecutionItem>) {
        let (tx, rx) = oneshot::channel();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let tool_name = tool.descriptor().name.clone();
        let spawn_generation = {
            let mut state = self.shared.lock();
            state.entries.push_back(QueueEntry {
                item: ToolExecutionItem {
                    id,
                    tool_name: tool_name.clone(),
                    params,
                    status: ItemStatus::Pending,
                    result: None,
                    error: None,
                },
                tool,
                responder: Some(tx),
            });
            if state.draining {
                None
            } else {
                state.draining = true;
                Some(state.generation)
            }
        };
        debug!(id, tool = %tool_name, "enqueued tool call");
        if let Some(generation) = spawn_generation {
            tokio::spawn(consume(self.shared.clone(), generation));
        }
        (id, rx)
    }

    /// Signal cancellation to the running item and drain what is waiting.
    ///
    /// No-op while idle, so a stale signal never poisons the next drain.
    pub fn cancel(&self) {
        let state = self.shared.lock();
        if state.draining {
            state.cancel.cancel();
        }
    }

    /// Cancel the in-flight token, discard every item and return to idle.
    pub fn clear(&self) {
        let drained: Vec<QueueEntry> = {
            let mut state = self.shared.lock();
            state.cancel.cancel();
            state.cancel = CancellationToken::new();
            state.generation = state.generation.wrapping_add(1);
            state.draining = false;
            state.entries.drain(..).collect()
        };
        let count = drained.len();
        for entry in drained {
            // A running item's responder is held by its consumer, which
            // reports the real outcome when the body returns.
            if entry.item.status == ItemStatus::Pending {
                self.shared.report_cancelled(entry);
            }
        }
        if count > 0 {
            info!(discarded = count, "tool queue cleared");
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }

    /// Items currently queued, head first.
    pub fn snapshot(&self) -> Vec<ItemSnapshot> {
        self.shared
            .lock()
            .entries
            .iter()
            .map(|entry| ItemSnapshot {
                id: entry.item.id,
                tool_name: entry.item.tool_name.clone(),
                status: entry.item.status,
            })
            .collect()
    }

    /// The running head item, if any.
    pub fn current(&self) -> Option<ItemSnapshot> {
        self.snapshot()
            .into_iter()
            .next()
            .filter(|item| item.status == ItemStatus::Running)
    }

    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while a consumer task is active.
    pub fn is_draining(&self) -> bool {
        self.shared.lock().draining
    }

    pub fn scratch(&self) -> &ScratchContext {
        &self.shared.scratch
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn report_cancelled(&self, mut entry: QueueEntry) {
        entry.item.status = ItemStatus::Cancelled;
        entry.item.error = Some(ToolError::Cancelled);
        self.emit(QueueEvent::Cancelled {
            id: entry.item.id,
            tool: entry.item.tool_name.clone(),
        });
        if let Some(responder) = entry.responder.take() {
            let _ = responder.send(entry.item);
        }
    }
}

/// Consumer loop. Exactly one runs per drain.
async fn consume(shared: Arc<Shared>, generation: u64) {
    let _exec = shared.exec_lock.lock().await;
    loop {
        let (tool, mut item, responder, cancel) = {
            let mut state = shared.lock();
            if state.generation != generation {
                return;
            }
            let tripped = if state.cancel.is_cancelled() {
                Some("cancelled")
            } else if !state.entries.is_empty() && shared.environment.is_busy() {
                Some("environment busy")
            } else {
                None
            };
            if let Some(reason) = tripped {
                let drained: Vec<QueueEntry> = state.entries.drain(..).collect();
                state.cancel = CancellationToken::new();
                state.draining = false;
                drop(state);
                if !drained.is_empty() {
                    warn!(reason, discarded = drained.len(), "draining tool queue");
                }
                for entry in drained {
                    shared.report_cancelled(entry);
                }
                return;
            }
            let Some(head) = state.entries.front_mut() else {
                state.draining = false;
                return;
            };
            head.item.status = ItemStatus::Running;
            (
                head.tool.clone(),
                head.item.clone(),
                head.responder.take(),
                state.cancel.clone(),
            )
        };

        debug!(id = item.id, tool = %item.tool_name, "running tool call");
        shared.emit(QueueEvent::Started {
            id: item.id,
            tool: item.tool_name.clone(),
        });

        let ctx = ToolContext::new(cancel, shared.scratch.clone(), shared.registry.clone())
            .with_permissions(tool.descriptor().permissions);
        let outcome = tool.execute(&item.params, &ctx).await;

        {
            let mut state = shared.lock();
            if state.generation == generation {
                state.entries.pop_front();
            }
        }

        let event = match outcome {
            Ok(value) => {
                shared.scratch.record(&item.tool_name, value.clone());
                item.status = ItemStatus::Completed;
                item.result = Some(value);
                QueueEvent::Completed {
                    id: item.id,
                    tool: item.tool_name.clone(),
                }
            }
            Err(ToolError::Cancelled) => {
                item.status = ItemStatus::Cancelled;
                item.error = Some(ToolError::Cancelled);
                QueueEvent::Cancelled {
                    id: item.id,
                    tool: item.tool_name.clone(),
                }
            }
            Err(err) => {
                debug!(id = item.id, tool = %item.tool_name, error = %err, "tool call failed");
                item.status = ItemStatus::Failed;
                let message = err.to_string();
                item.error = Some(err);
                QueueEvent::Failed {
                    id: item.id,
                    tool: item.tool_name.clone(),
                    error: message,
                }
            }
        };
        shared.emit(event);
        if let Some(responder) = responder {
            let _ = responder.send(item);
        }
    }
}
