//! Configuration data model.
//!
//! Every section derives `Deserialize` with `#[serde(default)]`, so a file
//! only needs the keys it wants to change.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults::{
    DEFAULT_API_BASE_URL, DEFAULT_API_KEY_ENV, DEFAULT_API_TIMEOUT_SECS, DEFAULT_MAX_ITERATIONS,
    DEFAULT_MODEL_ID, DEFAULT_STATE_DIR, SESSIONS_SUBDIR,
};
use crate::script::compiler::{DEFAULT_MAX_DIAGNOSTICS, DEFAULT_MAX_STEPS};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub agent: AgentConfig,
    pub approval: ApprovalConfig,
    pub tools: ToolsConfig,
    pub scripting: ScriptingConfig,
    pub sessions: SessionsConfig,
}

/// Completion service connection settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Literal key. Resolved from `api_key_env` at load time when empty.
    pub api_key: String,
    /// Environment variable to read the key from.
    pub api_key_env: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    /// Request streamed completions.
    pub stream: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.into(),
            api_key: String::new(),
            api_key_env: Some(DEFAULT_API_KEY_ENV.into()),
            model: DEFAULT_MODEL_ID.into(),
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
            stream: true,
        }
    }
}

/// Turn behavior.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Operator instructions appended to the built-in system prompt.
    pub system_prompt: String,
    pub max_iterations: usize,
    pub temperature: Option<f64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            temperature: None,
        }
    }
}

/// Per-permission-class auto-approval.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApprovalConfig {
    pub auto_approve_read: bool,
    pub auto_approve_write: bool,
    pub auto_approve_delete: bool,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            auto_approve_read: true,
            auto_approve_write: false,
            auto_approve_delete: false,
        }
    }
}

/// Built-in tool availability.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    pub files_enabled: bool,
    /// Root for the file tools. Defaults to the working directory.
    pub workspace_root: Option<String>,
    pub scripting_enabled: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            files_enabled: true,
            workspace_root: None,
            scripting_enabled: true,
        }
    }
}

impl ToolsConfig {
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Dynamic tool compiler limits.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScriptingConfig {
    pub max_diagnostics: usize,
    pub max_steps: u64,
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            max_diagnostics: DEFAULT_MAX_DIAGNOSTICS,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

/// Session storage location.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SessionsConfig {
    pub dir: Option<String>,
}

impl SessionsConfig {
    /// Configured directory, or `./.toolflow/sessions`.
    pub fn dir(&self) -> PathBuf {
        self.dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR).join(SESSIONS_SUBDIR))
    }
}

/// Result of `toolflow init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigInitResult {
    Created { path: PathBuf },
    AlreadyInitialized { path: PathBuf },
    Overwritten { path: PathBuf },
}
