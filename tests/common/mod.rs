//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use toolflow::api::CompletionService;
use toolflow::chat::{
    ApprovalPolicy, Approver, ChatOptions, ChatRuntime, SessionPersistence, StaticApprover,
};
use toolflow::error::{ApiError, ToolError};
use toolflow::tools::{
    ParamMap, ParamSpec, ParamType, Permissions, Tool, ToolContext, ToolDescriptor, ToolExecutor,
    ToolRegistry,
};
use toolflow::types::{ChatMessage, ChatRequest, ChatResponse, Choice, ToolCall};

static DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary directory removed on drop.
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new(prefix: &str) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let n = DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("toolflow-it-{prefix}-{millis}-{n}"));
        std::fs::create_dir_all(&path).expect("create temp dir");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Replays queued assistant messages and records every request it saw.
#[derive(Default)]
pub struct ScriptedService {
    replies: Mutex<VecDeque<ChatMessage>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedService {
    pub fn new(replies: Vec<ChatMessage>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: ChatMessage) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedService {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        let message = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ApiError::InvalidResponse("script exhausted".into()))?;
        Ok(ChatResponse {
            id: "it".into(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: Some("stop".into()),
            }],
        })
    }
}

/// `create_object`: records each created object's label in order.
///
/// With `cancel_after(n, token)`, the token fires once the n-th object has
/// been created, simulating the user interrupting mid-turn.
pub struct CreateObjectTool {
    descriptor: ToolDescriptor,
    created: Arc<Mutex<Vec<String>>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl CreateObjectTool {
    pub fn new(created: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            descriptor: ToolDescriptor::new("create_object", "Create a scene object")
                .permissions(Permissions::WRITE)
                .param(ParamSpec::required("kind", ParamType::String))
                .param(ParamSpec::optional("label", ParamType::String, Some(json!("")))),
            created,
            cancel_after: None,
        }
    }

    pub fn cancel_after(mut self, count: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((count, token));
        self
    }
}

#[async_trait]
impl Tool for CreateObjectTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, params: &ParamMap, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let kind = params
            .get("kind")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let label = params
            .get("label")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let count = {
            let mut created = self.created.lock().unwrap();
            created.push(label.clone());
            created.len()
        };
        if let Some((after, token)) = &self.cancel_after {
            if count == *after {
                token.cancel();
            }
        }
        Ok(json!({ "kind": kind, "label": label, "index": count }))
    }
}

pub fn cube_call(id: &str, label: &str) -> ToolCall {
    ToolCall::new(
        id,
        "create_object",
        json!({ "kind": "Cube", "label": label }).to_string(),
    )
}

pub fn runtime(
    service: Arc<dyn CompletionService>,
    registry: ToolRegistry,
    store: Arc<dyn SessionPersistence>,
    policy: ApprovalPolicy,
) -> ChatRuntime {
    runtime_with_approver(service, registry, store, policy, Arc::new(StaticApprover(false)))
}

pub fn runtime_with_approver(
    service: Arc<dyn CompletionService>,
    registry: ToolRegistry,
    store: Arc<dyn SessionPersistence>,
    policy: ApprovalPolicy,
    approver: Arc<dyn Approver>,
) -> ChatRuntime {
    ChatRuntime {
        service,
        executor: ToolExecutor::new(registry),
        store,
        approver,
        policy,
        options: ChatOptions {
            model: "test-model".into(),
            temperature: None,
            max_iterations: 8,
            stream: false,
        },
    }
}

/// Auto-approve writes only; reads and deletes still ask.
pub fn write_only_policy() -> ApprovalPolicy {
    ApprovalPolicy {
        auto_read: false,
        auto_write: true,
        auto_delete: false,
    }
}
