//! Shared test fixtures: temp directories, fixture tools, SSE payload helpers.

use crate::api::CompletionService;
use crate::error::{ApiError, ToolError};
use crate::types::{ChatMessage, ChatRequest, ChatResponse, Choice, ToolCall};
use crate::tools::{ParamMap, Permissions, Tool, ToolContext, ToolDescriptor};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary directory fixture with best-effort cleanup.
#[derive(Debug)]
pub struct TestTempDir {
    path: PathBuf,
}

impl TestTempDir {
    /// Create a unique temporary directory with a readable prefix.
    pub fn new(prefix: &str) -> Self {
        let suffix = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let dir = std::env::temp_dir().join(format!("toolflow-{prefix}-{millis}-{suffix}"));
        fs::create_dir_all(&dir).expect("failed to create temporary fixture directory");
        Self { path: dir }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn child(&self, relative: &str) -> PathBuf {
        self.path.join(relative)
    }

    /// Write UTF-8 text to a child path, creating parent directories as needed.
    pub fn write_text(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.child(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent directories for fixture");
        }
        fs::write(&path, content).expect("failed to write fixture file");
        path
    }
}

impl Drop for TestTempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// One `data:` SSE block as sent by `/chat/completions` streams.
pub fn sse_data_block(data: &str) -> String {
    format!("data: {data}\n\n")
}

/// Returns its resolved parameters as a JSON object.
pub struct EchoTool {
    descriptor: ToolDescriptor,
}

impl EchoTool {
    pub fn new(name: &str) -> Self {
        Self {
            descriptor: ToolDescriptor::new(name, "echoes its parameters"),
        }
    }

    pub fn with_descriptor(descriptor: ToolDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, params: &ParamMap, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let object = params
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        Ok(Value::Object(object))
    }
}

/// Returns its description as a string result.
pub struct StaticTool {
    descriptor: ToolDescriptor,
}

impl StaticTool {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            descriptor: ToolDescriptor::new(name, description),
        }
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.descriptor.permissions = permissions;
        self
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _params: &ParamMap, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Ok(Value::String(self.descriptor.description.clone()))
    }
}

/// Always fails with the given message.
pub struct FailingTool {
    descriptor: ToolDescriptor,
    message: String,
}

impl FailingTool {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            descriptor: ToolDescriptor::new(name, "always fails"),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _params: &ParamMap, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Err(ToolError::ExecutionFailed(self.message.clone()))
    }
}

/// Shared observations recorded by [`TrackingTool`].
#[derive(Debug, Default)]
pub struct CallStats {
    active: AtomicUsize,
    max_active: AtomicUsize,
    order: Mutex<Vec<String>>,
}

impl CallStats {
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Labels in the order their executions finished.
    pub fn order(&self) -> Vec<String> {
        self.order.lock().expect("order lock").clone()
    }
}

/// Sleeps briefly while tracking how many calls run concurrently.
///
/// With `honor_cancel`, the sleep ends early when the token fires.
pub struct TrackingTool {
    descriptor: ToolDescriptor,
    stats: Arc<CallStats>,
    delay: Duration,
    honor_cancel: bool,
}

impl TrackingTool {
    pub fn new(name: &str, stats: Arc<CallStats>, delay: Duration) -> Self {
        Self {
            descriptor: ToolDescriptor::new(name, "records execution order"),
            stats,
            delay,
            honor_cancel: false,
        }
    }

    pub fn honoring_cancel(mut self) -> Self {
        self.honor_cancel = true;
        self
    }
}

#[async_trait]
impl Tool for TrackingTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, params: &ParamMap, ctx: &ToolContext) -> Result<Value, ToolError> {
        let now = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(now, Ordering::SeqCst);
        let cancelled = if self.honor_cancel {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => false,
                _ = ctx.cancellation().cancelled() => true,
            }
        } else {
            tokio::time::sleep(self.delay).await;
            false
        };
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
        if cancelled {
            return Err(ToolError::Cancelled);
        }
        let label = params
            .get("label")
            .map(|v| v.to_json())
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        self.stats.order.lock().expect("order lock").push(label.clone());
        Ok(json!({ "label": label }))
    }
}

/// Completion service that replays queued replies and records every request.
#[derive(Default)]
pub struct ScriptedService {
    replies: Mutex<std::collections::VecDeque<Result<ChatMessage, ApiError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, message: ChatMessage) -> &Self {
        self.replies.lock().unwrap().push_back(Ok(message));
        self
    }

    pub fn push_error(&self, error: ApiError) -> &Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedService {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::InvalidResponse("script exhausted".into())));
        next.map(|message| ChatResponse {
            id: "scripted".into(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: Some("stop".into()),
            }],
        })
    }
}

/// Completion service that never answers.
pub struct StalledService;

#[async_trait]
impl CompletionService for StalledService {
    async fn complete(&self, _request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        futures::future::pending().await
    }
}

/// Assistant message calling `tool` once per id, with empty arguments.
pub fn calls_reply(tool: &str, ids: &[&str]) -> ChatMessage {
    ChatMessage::assistant_tool_calls(
        ids.iter()
            .map(|id| ToolCall::new(*id, tool, "{}"))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_dir_fixture_writes_and_resolves_paths() {
        let fixture = TestTempDir::new("fixture");
        let file = fixture.write_text("nested/file.txt", "hello");
        assert_eq!(fs::read_to_string(file).unwrap(), "hello");
    }

    #[test]
    fn sse_helper_emits_data_block() {
        assert_eq!(sse_data_block("[DONE]"), "data: [DONE]\n\n");
    }
}
