//! Workspace-confined file tools.
//!
//! - `read_file`: returns a file's text, clipped to a byte limit.
//! - `write_file`: creates or overwrites (or appends to) a file.
//! - `delete_file`: removes a file.
//!
//! Paths are relative to the workspace root. Absolute paths and `..`
//! components are rejected before touching the filesystem.

use crate::error::ToolError;
use crate::textutil::clip_bytes;
use crate::tools::{
    ParamMap, ParamSpec, ParamType, Permissions, Tool, ToolContext, ToolDescriptor,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Default byte limit for `read_file`.
const DEFAULT_READ_LIMIT: i64 = 8000;

/// Root directory every file tool is confined to.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a relative path into the workspace.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ToolError> {
        let candidate = Path::new(relative.trim());
        if candidate.as_os_str().is_empty() {
            return Err(ToolError::InvalidArguments("path must not be empty".into()));
        }
        for component in candidate.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(ToolError::InvalidArguments(format!(
                        "path `{relative}` escapes the workspace"
                    )))
                }
            }
        }
        Ok(self.root.join(candidate))
    }
}

fn path_param(params: &ParamMap) -> Result<&str, ToolError> {
    params
        .get("path")
        .and_then(|value| value.as_str())
        .ok_or_else(|| ToolError::InvalidArguments("`path` must be a string".into()))
}

fn io_failure(action: &str, path: &str, err: std::io::Error) -> ToolError {
    ToolError::ExecutionFailed(format!("failed to {action} {path}: {err}"))
}

// ---------------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------------

pub struct ReadFileTool {
    workspace: Arc<Workspace>,
    descriptor: ToolDescriptor,
}

impl ReadFileTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        let descriptor = ToolDescriptor::new(
            "read_file",
            "Read a text file from the workspace. Large files are truncated.",
        )
        .permissions(Permissions::READ)
        .param(ParamSpec::required("path", ParamType::String).describe("Workspace-relative path"))
        .param(
            ParamSpec::optional("max_bytes", ParamType::Integer, Some(json!(DEFAULT_READ_LIMIT)))
                .describe("Maximum bytes of content to return"),
        );
        Self {
            workspace,
            descriptor,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, params: &ParamMap, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let relative = path_param(params)?;
        let path = self.workspace.resolve(relative)?;
        let limit = params
            .get("max_bytes")
            .and_then(|value| value.as_i64())
            .unwrap_or(DEFAULT_READ_LIMIT)
            .max(0) as usize;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_failure("read", relative, e))?;
        let truncated = content.len() > limit;
        Ok(json!({
            "path": relative,
            "content": clip_bytes(&content, limit, "...[truncated]"),
            "truncated": truncated,
        }))
    }
}

// ---------------------------------------------------------------------------
// write_file
// ---------------------------------------------------------------------------

pub struct WriteFileTool {
    workspace: Arc<Workspace>,
    descriptor: ToolDescriptor,
}

impl WriteFileTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        let descriptor = ToolDescriptor::new(
            "write_file",
            "Write text to a workspace file, creating it and its parent directories if needed.",
        )
        .permissions(Permissions::WRITE)
        .param(ParamSpec::required("path", ParamType::String).describe("Workspace-relative path"))
        .param(ParamSpec::required("content", ParamType::String))
        .param(
            ParamSpec::optional("append", ParamType::Boolean, Some(json!(false)))
                .describe("Append instead of overwriting"),
        );
        Self {
            workspace,
            descriptor,
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, params: &ParamMap, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let relative = path_param(params)?;
        let path = self.workspace.resolve(relative)?;
        let content = params
            .get("content")
            .and_then(|value| value.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("`content` must be a string".into()))?;
        let append = params
            .get("append")
            .and_then(|value| value.as_bool())
            .unwrap_or(false);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure("create directories for", relative, e))?;
        }
        if append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| io_failure("open", relative, e))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|e| io_failure("append to", relative, e))?;
        } else {
            tokio::fs::write(&path, content)
                .await
                .map_err(|e| io_failure("write", relative, e))?;
        }
        Ok(json!({ "path": relative, "bytes": content.len(), "appended": append }))
    }
}

// ---------------------------------------------------------------------------
// delete_file
// ---------------------------------------------------------------------------

pub struct DeleteFileTool {
    workspace: Arc<Workspace>,
    descriptor: ToolDescriptor,
}

impl DeleteFileTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        let descriptor = ToolDescriptor::new("delete_file", "Delete a file from the workspace.")
            .permissions(Permissions::DELETE)
            .param(ParamSpec::required("path", ParamType::String).describe("Workspace-relative path"));
        Self {
            workspace,
            descriptor,
        }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, params: &ParamMap, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let relative = path_param(params)?;
        let path = self.workspace.resolve(relative)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| io_failure("delete", relative, e))?;
        Ok(json!({ "path": relative, "deleted": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::TestTempDir;
    use crate::tools::{ParamValue, ToolRegistry};

    fn params(pairs: &[(&str, ParamValue)]) -> ParamMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn ctx() -> ToolContext {
        ToolContext::detached(ToolRegistry::new())
    }

    #[test]
    fn resolve_rejects_escapes() {
        let workspace = Workspace::new("/srv/ws");
        assert_eq!(
            workspace.resolve("a/b.txt").unwrap(),
            PathBuf::from("/srv/ws/a/b.txt")
        );
        assert!(workspace.resolve("../etc/passwd").is_err());
        assert!(workspace.resolve("/etc/passwd").is_err());
        assert!(workspace.resolve("  ").is_err());
    }

    #[tokio::test]
    async fn write_read_delete_round_trip() {
        let fixture = TestTempDir::new("file-tools");
        let workspace = Arc::new(Workspace::new(fixture.path()));
        let path = ParamValue::Str("notes/todo.txt".into());

        WriteFileTool::new(workspace.clone())
            .execute(
                &params(&[
                    ("path", path.clone()),
                    ("content", ParamValue::Str("one".into())),
                ]),
                &ctx(),
            )
            .await
            .unwrap();
        WriteFileTool::new(workspace.clone())
            .execute(
                &params(&[
                    ("path", path.clone()),
                    ("content", ParamValue::Str(" two".into())),
                    ("append", ParamValue::Bool(true)),
                ]),
                &ctx(),
            )
            .await
            .unwrap();

        let read = ReadFileTool::new(workspace.clone())
            .execute(&params(&[("path", path.clone())]), &ctx())
            .await
            .unwrap();
        assert_eq!(read["content"], "one two");
        assert_eq!(read["truncated"], false);

        DeleteFileTool::new(workspace.clone())
            .execute(&params(&[("path", path.clone())]), &ctx())
            .await
            .unwrap();
        assert!(!fixture.child("notes/todo.txt").exists());
    }

    #[tokio::test]
    async fn read_clips_large_files() {
        let fixture = TestTempDir::new("file-tools-clip");
        fixture.write_text("big.txt", &"x".repeat(50));
        let tool = ReadFileTool::new(Arc::new(Workspace::new(fixture.path())));
        let read = tool
            .execute(
                &params(&[
                    ("path", ParamValue::Str("big.txt".into())),
                    ("max_bytes", ParamValue::Int(10)),
                ]),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(read["content"], format!("{}...[truncated]", "x".repeat(10)));
        assert_eq!(read["truncated"], true);
    }

    #[tokio::test]
    async fn missing_file_is_an_execution_failure() {
        let fixture = TestTempDir::new("file-tools-missing");
        let tool = DeleteFileTool::new(Arc::new(Workspace::new(fixture.path())));
        let err = tool
            .execute(&params(&[("path", ParamValue::Str("nope.txt".into()))]), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)), "{err:?}");
    }

    #[test]
    fn descriptors_carry_permission_classes() {
        let workspace = Arc::new(Workspace::new("."));
        assert_eq!(
            ReadFileTool::new(workspace.clone()).descriptor().permissions,
            Permissions::READ
        );
        assert_eq!(
            WriteFileTool::new(workspace.clone()).descriptor().permissions,
            Permissions::WRITE
        );
        assert_eq!(
            DeleteFileTool::new(workspace).descriptor().permissions,
            Permissions::DELETE
        );
    }
}
