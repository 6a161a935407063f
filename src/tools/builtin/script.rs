//! Tools that expose the scripting layer to the model.

use crate::error::ToolError;
use crate::script::DynamicToolCompiler;
use crate::tools::{
    ParamMap, ParamSpec, ParamType, Permissions, Tool, ToolContext, ToolDescriptor,
};
use async_trait::async_trait;
use serde_json::{json, Value};

fn string_param<'p>(params: &'p ParamMap, name: &str) -> Result<&'p str, ToolError> {
    params
        .get(name)
        .and_then(|value| value.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("`{name}` must be a string")))
}

/// `execute_code`: run a one-shot script and return its rendered result.
pub struct ExecuteCodeTool {
    compiler: DynamicToolCompiler,
    descriptor: ToolDescriptor,
}

impl ExecuteCodeTool {
    pub fn new(compiler: DynamicToolCompiler) -> Self {
        let descriptor = ToolDescriptor::new(
            "execute_code",
            "Run a short script once and return its result. Scripts may call other tools with \
             call(name, {args}) and read earlier results with last_result(name). Tool \
             definitions are not allowed here; use create_tool for that. Called tools may \
             only read and write; delete tools must be called directly.",
        )
        .permissions(Permissions::READ | Permissions::WRITE)
        .param(ParamSpec::required("code", ParamType::String).describe("Script statements"));
        Self {
            compiler,
            descriptor,
        }
    }
}

#[async_trait]
impl Tool for ExecuteCodeTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, params: &ParamMap, ctx: &ToolContext) -> Result<Value, ToolError> {
        let code = string_param(params, "code")?;
        let output = self
            .compiler
            .run_once(code, ctx, ctx.cancellation())
            .await?;
        Ok(Value::String(output))
    }
}

/// `create_tool`: compile a script and register it as a new tool.
pub struct CreateToolTool {
    compiler: DynamicToolCompiler,
    descriptor: ToolDescriptor,
}

impl CreateToolTool {
    pub fn new(compiler: DynamicToolCompiler) -> Self {
        let descriptor = ToolDescriptor::new(
            "create_tool",
            "Compile and register a new tool. `source` is either a full definition \
             (tool NAME { description \"...\"; permission write; param x: number = 1; run { ... } }) \
             or just the statements of the run block, which then read inputs from `params`.",
        )
        .permissions(Permissions::WRITE)
        .param(ParamSpec::required("name", ParamType::String).describe("Name of the new tool"))
        .param(ParamSpec::required("source", ParamType::String).describe("Script source"));
        Self {
            compiler,
            descriptor,
        }
    }
}

#[async_trait]
impl Tool for CreateToolTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, params: &ParamMap, ctx: &ToolContext) -> Result<Value, ToolError> {
        let name = string_param(params, "name")?;
        let source = string_param(params, "source")?;
        let descriptor = ctx
            .registry()
            .create_dynamic_tool(&self.compiler, name, source)?;
        Ok(json!({
            "name": descriptor.name,
            "description": descriptor.description,
            "permissions": descriptor.permissions.to_string(),
            "params": descriptor.params.iter().map(|p| p.name.clone()).collect::<Vec<_>>(),
        }))
    }
}
