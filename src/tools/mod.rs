//! Pluggable tool system.
//!
//! Tools are async trait objects described by an immutable
//! [`ToolDescriptor`]. They are registered in a [`ToolRegistry`], invoked
//! through the [`ToolExecutor`] façade, and run one at a time on the
//! [`ToolExecutionQueue`].

pub mod builtin;
pub mod executor;
pub mod params;
pub mod queue;
pub mod registry;

use crate::error::ToolError;
use crate::types::{FunctionDefinition, ToolDefinition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

pub use executor::ToolExecutor;
pub use params::{ParamMap, ParamSpec, ParamType, ParamValue};
pub use queue::{
    Environment, IdleEnvironment, ItemSnapshot, ItemStatus, QueueEvent, ToolExecutionItem,
    ToolExecutionQueue,
};
pub use registry::ToolRegistry;

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// Permission bits a tool declares; drive the confirmation policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(u8);

impl Permissions {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(0b001);
    pub const WRITE: Self = Self(0b010);
    pub const DELETE: Self = Self(0b100);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Parse one permission class name (`none`, `read`, `write`, `delete`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Self::NONE),
            "read" => Some(Self::READ),
            "write" => Some(Self::WRITE),
            "delete" => Some(Self::DELETE),
            _ => None,
        }
    }

    /// Names of the set bits in declaration order.
    pub fn names(self) -> Vec<&'static str> {
        [(Self::READ, "read"), (Self::WRITE, "write"), (Self::DELETE, "delete")]
            .into_iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| name)
            .collect()
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(f, "none");
        }
        write!(f, "{}", self.names().join("|"))
    }
}

// ---------------------------------------------------------------------------
// ToolDescriptor
// ---------------------------------------------------------------------------

/// Immutable description of a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    /// Model-facing description.
    pub description: String,
    pub permissions: Permissions,
    /// Ordered parameter declarations.
    pub params: Vec<ParamSpec>,
    /// Names of other tools that must be registered for this one to run.
    pub dependencies: Vec<String>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            permissions: Permissions::NONE,
            params: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn depends_on(mut self, tool: impl Into<String>) -> Self {
        self.dependencies.push(tool.into());
        self
    }

    /// Declaration sent to the completion service.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_type: "function".into(),
            function: FunctionDefinition {
                name: self.name.clone(),
                description: self.description.clone(),
                parameters: params::parameters_schema(&self.params),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

/// A side-effecting operation the model can invoke.
///
/// Implementations should check [`ToolContext::is_cancelled`] during long
/// work; the queue never aborts a running body.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    /// Execute with parameters already coerced to their declared types.
    async fn execute(&self, params: &ParamMap, ctx: &ToolContext) -> Result<Value, ToolError>;
}

// ---------------------------------------------------------------------------
// Scratch context
// ---------------------------------------------------------------------------

/// Last successful result per tool name for the current turn.
///
/// Written only from the queue consumer, read by later calls in the same
/// turn. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct ScratchContext {
    results: Arc<RwLock<HashMap<String, Value>>>,
}

impl ScratchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, tool: &str, result: Value) {
        self.results
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tool.to_string(), result);
    }

    pub fn last_result(&self, tool: &str) -> Option<Value> {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool)
            .cloned()
    }

    pub fn clear(&self) {
        self.results
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

// ---------------------------------------------------------------------------
// ToolContext
// ---------------------------------------------------------------------------

/// Maximum nesting of tool-to-tool calls made from inside a tool body.
pub const MAX_INLINE_DEPTH: usize = 8;

/// Execution context passed to every tool body.
///
/// `granted` is what the running tool was approved for. Tools it calls
/// inline must need no more than that.
#[derive(Clone)]
pub struct ToolContext {
    cancel: CancellationToken,
    scratch: ScratchContext,
    registry: ToolRegistry,
    granted: Permissions,
    depth: usize,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken, scratch: ScratchContext, registry: ToolRegistry) -> Self {
        Self {
            cancel,
            scratch,
            registry,
            granted: Permissions::NONE,
            depth: 0,
        }
    }

    pub fn with_permissions(mut self, granted: Permissions) -> Self {
        self.granted = granted;
        self
    }

    /// Context with a fresh token and empty scratch, for direct invocation.
    pub fn detached(registry: ToolRegistry) -> Self {
        Self::new(CancellationToken::new(), ScratchContext::new(), registry)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn last_result(&self, tool: &str) -> Option<Value> {
        self.scratch.last_result(tool)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn granted(&self) -> Permissions {
        self.granted
    }

    /// Run another tool inline, inside the queue slot the caller already holds.
    ///
    /// Parameters and dependencies are checked exactly as for queued calls;
    /// a successful result is recorded in the scratch context. The callee's
    /// permissions must be a subset of the caller's grant, and it runs with
    /// its own permissions as the new grant.
    pub async fn invoke_inline(
        &self,
        name: &str,
        raw: &serde_json::Map<String, Value>,
    ) -> Result<Value, ToolError> {
        if self.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        if self.depth >= MAX_INLINE_DEPTH {
            return Err(ToolError::ExecutionFailed(format!(
                "nested tool calls exceed depth {MAX_INLINE_DEPTH}"
            )));
        }
        let tool = self.registry.lookup(name)?;
        let descriptor = tool.descriptor();
        if !self.granted.contains(descriptor.permissions) {
            return Err(ToolError::PermissionDenied {
                tool: descriptor.name.clone(),
                required: descriptor.permissions,
                granted: self.granted,
            });
        }
        self.registry.check_dependencies(descriptor)?;
        let params = params::resolve_params(&descriptor.name, &descriptor.params, raw)?;
        let nested = Self {
            granted: descriptor.permissions,
            depth: self.depth + 1,
            ..self.clone()
        };
        let result = tool.execute(&params, &nested).await?;
        self.scratch.record(name, result.clone());
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Result envelope
// ---------------------------------------------------------------------------

/// Uniform result reported for every tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Structured text fed back to the model as the tool-role message.
    pub fn to_feedback(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"success\":{},\"result\":null,\"error\":\"unserializable result\"}}",
                self.success
            )
        })
    }
}

impl From<Result<Value, ToolError>> for ToolOutcome {
    fn from(result: Result<Value, ToolError>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(err) => Self::failed(err.to_string()),
        }
    }
}
