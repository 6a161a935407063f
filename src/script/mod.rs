//! Sandboxed scripting layer for dynamic tools and one-shot code.
//!
//! Scripts are parsed into a syntax tree, checked, and then interpreted. A
//! script can reach the outside world only through its [`ScriptHost`]; there
//! is no file, process or network access of its own.
//!
//! ```text
//! tool spawn_row {
//!     description "Create a row of cubes";
//!     permission write;
//!     param count: integer = 3;
//!     run {
//!         let ids = [];
//!         for i in range(count) {
//!             push(ids, call("create_object", { kind: "Cube", x: i * 2 }));
//!         }
//!         return ids;
//!     }
//! }
//! ```

pub mod compiler;
pub mod interp;
pub mod lexer;
pub mod parser;

use crate::error::ToolError;
use crate::tools::ToolContext;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use tracing::info;

pub use compiler::{DynamicToolCompiler, OneShotScript, ScriptTool};

/// 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

/// One compile-time problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub pos: Pos,
    pub message: String,
}

impl Diagnostic {
    pub fn new(pos: Pos, message: impl Into<String>) -> Self {
        Self {
            pos,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}, col {}: {}",
            self.pos.line, self.pos.col, self.message
        )
    }
}

/// Host functions available to running scripts.
#[async_trait]
pub trait ScriptHost: Send + Sync {
    /// Invoke a registered tool with raw arguments.
    async fn call_tool(&self, name: &str, args: &Map<String, Value>) -> Result<Value, ToolError>;

    /// Most recent successful result of `tool` in the current turn.
    fn last_result(&self, tool: &str) -> Option<Value>;

    fn log(&self, message: &str);
}

#[async_trait]
impl ScriptHost for ToolContext {
    async fn call_tool(&self, name: &str, args: &Map<String, Value>) -> Result<Value, ToolError> {
        self.invoke_inline(name, args).await
    }

    fn last_result(&self, tool: &str) -> Option<Value> {
        ToolContext::last_result(self, tool)
    }

    fn log(&self, message: &str) {
        info!(target: "toolflow::script", "{message}");
    }
}

/// Render a script result as text: strings verbatim, everything else as JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
