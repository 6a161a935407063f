//! Error taxonomy for the tool runtime.
//!
//! Errors are layered the same way the runtime is: a [`ToolError`] is scoped
//! to a single tool call, [`ApiError`] and [`PersistenceError`] belong to the
//! external collaborators, and [`ChatError`] is what a turn reports to its
//! caller.

use crate::tools::Permissions;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ToolError
// ---------------------------------------------------------------------------

/// Errors scoped to one tool call or one registry operation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    /// A required parameter was absent from the call arguments.
    #[error("missing required parameter `{param}` for tool `{tool}`")]
    MissingParameter { tool: String, param: String },

    /// A parameter value could not be coerced to its declared type.
    #[error("invalid value for parameter `{param}`: expected {expected}, got {found}")]
    InvalidParameter {
        param: String,
        expected: String,
        found: String,
    },

    /// The call arguments were not a JSON object (or not JSON at all).
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool already registered: {0}")]
    Duplicate(String),

    /// A declared dependency is not present in the registry.
    #[error("tool `{tool}` depends on `{dependency}`, which is not registered")]
    MissingDependency { tool: String, dependency: String },

    /// Dynamic tool source failed to compile.
    #[error("compilation failed:\n{}", .diagnostics.join("\n"))]
    Compilation { diagnostics: Vec<String> },

    /// A tool body tried to call a tool needing permissions it was not
    /// granted itself.
    #[error("tool `{tool}` needs [{required}] but the calling tool was only granted [{granted}]")]
    PermissionDenied {
        tool: String,
        required: Permissions,
        granted: Permissions,
    },

    /// The tool body ran and reported a failure.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The call was cancelled before or during execution.
    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    /// True for errors caused by the caller's arguments rather than the tool.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingParameter { .. } | Self::InvalidParameter { .. } | Self::InvalidArguments(_)
        )
    }
}

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// Errors from the completion service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network / reqwest-level error.
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx status from the API.
    #[error("status {code}: {body}")]
    Status { code: u16, body: String },

    /// The provider returned a payload we could not interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The client is configured in a way that can never succeed.
    #[error("misconfigured completion service: {0}")]
    Misconfigured(String),
}

impl ApiError {
    /// Misconfiguration is fatal for the turn; everything else may be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Misconfigured(_))
            || matches!(self, Self::Status { code, .. } if *code == 401 || *code == 403)
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors when loading or parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// PersistenceError
// ---------------------------------------------------------------------------

/// Errors from the session persistence collaborator.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid session id: {0}")]
    InvalidId(String),
    #[error("session not found: {0}")]
    NotFound(String),
    /// The stored session belongs to another chat instance.
    #[error("session {session_id} is owned by `{owner}`, not `{requested_by}`")]
    OwnerMismatch {
        session_id: String,
        owner: String,
        requested_by: String,
    },
    #[error("unsupported session file version {0}")]
    UnsupportedVersion(u32),
}

// ---------------------------------------------------------------------------
// ChatError: top level
// ---------------------------------------------------------------------------

/// Errors reported by a chat turn.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("api: {0}")]
    Api(#[from] ApiError),
    #[error("persistence: {0}")]
    Persistence(#[from] PersistenceError),
    /// The confirmation collaborator can no longer answer; the turn is aborted.
    #[error("confirmation unavailable: {0}")]
    ConfirmationUnavailable(String),
    /// The requested operation does not apply to the session's current state.
    #[error("invalid session state: {0}")]
    InvalidState(String),
    #[error("invalid edit: {0}")]
    InvalidEdit(String),
    /// Model returned no message.
    #[error("model returned empty response")]
    EmptyResponse,
    /// The tool round-trip loop exceeded the configured iteration cap.
    #[error("max tool loop iterations reached")]
    MaxIterationsReached,
}
