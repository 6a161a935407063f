//! Invocation façade: validates a call, schedules it, awaits the outcome.

use super::params::{self, ParamMap};
use super::queue::{Environment, ItemStatus, ToolExecutionItem, ToolExecutionQueue};
use super::{ScratchContext, ToolOutcome, ToolRegistry};
use crate::error::ToolError;
use crate::types::ToolCall;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Entry point for every tool invocation, model-requested or direct.
///
/// Validation happens here, before anything is queued, so a bad call never
/// occupies a queue slot.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    queue: ToolExecutionQueue,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        let queue = ToolExecutionQueue::new(registry.clone(), ScratchContext::new());
        Self { registry, queue }
    }

    pub fn with_environment(registry: ToolRegistry, environment: Arc<dyn Environment>) -> Self {
        let queue =
            ToolExecutionQueue::with_environment(registry.clone(), ScratchContext::new(), environment);
        Self { registry, queue }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &ToolExecutionQueue {
        &self.queue
    }

    pub fn scratch(&self) -> &ScratchContext {
        self.queue.scratch()
    }

    /// Forget per-turn results. Called when a new user turn begins.
    pub fn reset_scratch(&self) {
        self.queue.scratch().clear();
    }

    /// Run `name` with raw arguments and wait for it to finish.
    ///
    /// When `cancel` fires, the whole queue is cleared; the call still waits
    /// for the real outcome of a body that was already running.
    pub async fn run(
        &self,
        name: &str,
        raw: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        let tool = self.registry.lookup(name)?;
        let descriptor = tool.descriptor();
        self.registry.check_dependencies(descriptor)?;
        let params: ParamMap = params::resolve_params(&descriptor.name, &descriptor.params, raw)?;

        let (id, mut rx) = self.queue.enqueue(tool, params);
        let item = tokio::select! {
            item = &mut rx => item,
            _ = cancel.cancelled() => {
                debug!(id, tool = %name, "cancellation requested; clearing queue");
                self.queue.clear();
                rx.await
            }
        };
        match item {
            Ok(item) => into_result(item),
            // Responder dropped without reporting: treat as cancelled.
            Err(_) => Err(ToolError::Cancelled),
        }
    }

    /// Like [`run`](Self::run), but parses the serialized argument string.
    pub async fn run_call(
        &self,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let raw = params::parse_arguments(&call.function.arguments)?;
        self.run(&call.function.name, &raw, cancel).await
    }

    /// Run and wrap the result in the uniform envelope.
    pub async fn execute(
        &self,
        name: &str,
        raw: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> ToolOutcome {
        self.run(name, raw, cancel).await.into()
    }
}

fn into_result(item: ToolExecutionItem) -> Result<Value, ToolError> {
    match item.status {
        ItemStatus::Completed => Ok(item.result.unwrap_or(Value::Null)),
        ItemStatus::Cancelled => Err(ToolError::Cancelled),
        _ => Err(item
            .error
            .unwrap_or_else(|| ToolError::ExecutionFailed("unknown failure".into()))),
    }
}
