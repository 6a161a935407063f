//! Tools shipped with the runtime.

pub mod files;
pub mod script;
pub mod time;

use super::ToolRegistry;
use crate::error::ToolError;
use crate::script::DynamicToolCompiler;
use std::path::PathBuf;
use std::sync::Arc;

pub use files::{DeleteFileTool, ReadFileTool, Workspace, WriteFileTool};
pub use script::{CreateToolTool, ExecuteCodeTool};
pub use time::TimeTool;

/// Which built-in tools to register.
#[derive(Debug, Clone, Default)]
pub struct BuiltinOptions {
    /// Enables the file tools, confined to this directory.
    pub workspace_root: Option<PathBuf>,
    /// Enables `execute_code` and `create_tool` with this compiler.
    pub scripting: Option<DynamicToolCompiler>,
}

/// Register `time` plus whichever optional tool groups are enabled.
pub fn register_builtins(registry: &ToolRegistry, options: &BuiltinOptions) -> Result<(), ToolError> {
    registry.register(TimeTool::new())?;
    if let Some(root) = &options.workspace_root {
        let workspace = Arc::new(Workspace::new(root.clone()));
        registry.register(ReadFileTool::new(workspace.clone()))?;
        registry.register(WriteFileTool::new(workspace.clone()))?;
        registry.register(DeleteFileTool::new(workspace))?;
    }
    if let Some(compiler) = &options.scripting {
        registry.register(ExecuteCodeTool::new(compiler.clone()))?;
        registry.register(CreateToolTool::new(compiler.clone()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_only_enabled_groups() {
        let registry = ToolRegistry::new();
        register_builtins(&registry, &BuiltinOptions::default()).unwrap();
        assert_eq!(registry.names(), vec!["time"]);

        let registry = ToolRegistry::new();
        register_builtins(
            &registry,
            &BuiltinOptions {
                workspace_root: Some(PathBuf::from(".")),
                scripting: Some(DynamicToolCompiler::default()),
            },
        )
        .unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "create_tool",
                "delete_file",
                "execute_code",
                "read_file",
                "time",
                "write_file"
            ]
        );
    }

    #[test]
    fn registering_twice_is_rejected() {
        let registry = ToolRegistry::new();
        register_builtins(&registry, &BuiltinOptions::default()).unwrap();
        let err = register_builtins(&registry, &BuiltinOptions::default()).unwrap_err();
        assert_eq!(err, ToolError::Duplicate("time".into()));
    }
}
