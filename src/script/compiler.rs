//! Turns script source into invocable tools.

use super::interp::{builtin_arity, Interpreter};
use super::lexer::tokenize;
use super::parser::{parse, Expr, PathSegment, Program, Stmt, ToolDef};
use super::{render_value, Diagnostic, Pos, ScriptHost};
use crate::error::ToolError;
use crate::tools::params::{self, ParamMap, ParamSpec};
use crate::tools::{Tool, ToolContext, ToolDescriptor};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_MAX_DIAGNOSTICS: usize = 10;
pub const DEFAULT_MAX_STEPS: u64 = 100_000;

/// Compiles tool scripts and runs one-shot code.
#[derive(Debug, Clone)]
pub struct DynamicToolCompiler {
    max_diagnostics: usize,
    max_steps: u64,
}

impl Default for DynamicToolCompiler {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MAX_DIAGNOSTICS, DEFAULT_MAX_STEPS)
    }
}

impl DynamicToolCompiler {
    pub fn with_limits(max_diagnostics: usize, max_steps: u64) -> Self {
        Self {
            max_diagnostics: max_diagnostics.max(1),
            max_steps,
        }
    }

    pub fn max_diagnostics(&self) -> usize {
        self.max_diagnostics
    }

    pub fn max_steps(&self) -> u64 {
        self.max_steps
    }

    /// Compile `source` into a tool named `name`.
    ///
    /// `source` is either a complete `tool NAME { ... }` definition or a bare
    /// body, which is wrapped with a generic description, no permissions and
    /// no declared parameters.
    pub fn compile_tool(&self, name: &str, source: &str) -> Result<Arc<dyn Tool>, ToolError> {
        let mut diagnostics = Vec::new();
        if !is_identifier(name) {
            diagnostics.push(Diagnostic::new(
                Pos { line: 1, col: 1 },
                format!("invalid tool name `{name}`"),
            ));
        }
        let tokens = tokenize(source, &mut diagnostics);
        let tool = match parse(tokens, &mut diagnostics) {
            Program::Tool(def) => self.from_definition(name, def, &mut diagnostics),
            Program::Body(body) => {
                check_body(&body, &["params"], &mut diagnostics);
                ScriptTool {
                    descriptor: ToolDescriptor::new(
                        name,
                        format!("Dynamically created tool `{name}`."),
                    ),
                    body: body.into(),
                    max_steps: self.max_steps,
                }
            }
        };
        self.finish(name, diagnostics)?;
        Ok(Arc::new(tool))
    }

    /// Compile one-shot code. Tool definitions are rejected.
    pub fn compile_once(&self, source: &str) -> Result<OneShotScript, ToolError> {
        let mut diagnostics = Vec::new();
        let tokens = tokenize(source, &mut diagnostics);
        let body = match parse(tokens, &mut diagnostics) {
            Program::Tool(def) => {
                diagnostics.push(Diagnostic::new(
                    def.pos,
                    "tool definitions are not allowed in one-shot code",
                ));
                Vec::new()
            }
            Program::Body(body) => {
                check_body(&body, &["params"], &mut diagnostics);
                body
            }
        };
        self.finish("<one-shot>", diagnostics)?;
        Ok(OneShotScript {
            body,
            max_steps: self.max_steps,
        })
    }

    /// Compile and run `source` once; the result is rendered as text.
    pub async fn run_once(
        &self,
        source: &str,
        host: &dyn ScriptHost,
        cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        let script = self.compile_once(source)?;
        let value = script.run(host, cancel).await?;
        Ok(render_value(&value))
    }

    fn from_definition(
        &self,
        requested: &str,
        def: ToolDef,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> ScriptTool {
        if !def.name.is_empty() && def.name != requested {
            diagnostics.push(Diagnostic::new(
                def.pos,
                format!(
                    "tool is named `{}` but was requested as `{requested}`",
                    def.name
                ),
            ));
        }

        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(def.params.len());
        for decl in &def.params {
            if !seen.insert(decl.name.as_str()) {
                diagnostics.push(Diagnostic::new(
                    decl.pos,
                    format!("duplicate parameter `{}`", decl.name),
                ));
                continue;
            }
            if let Some(default) = &decl.default {
                if let Err(err) = params::coerce(&decl.name, &decl.param_type, default) {
                    diagnostics.push(Diagnostic::new(decl.pos, format!("bad default: {err}")));
                }
            }
            specs.push(ParamSpec {
                name: decl.name.clone(),
                param_type: decl.param_type.clone(),
                required: decl.required,
                default: decl.default.clone(),
                description: String::new(),
            });
        }

        let mut globals: Vec<&str> = vec!["params"];
        globals.extend(specs.iter().map(|spec| spec.name.as_str()));
        check_body(&def.body, &globals, diagnostics);

        let mut descriptor = ToolDescriptor::new(
            requested,
            def.description
                .unwrap_or_else(|| format!("Dynamically created tool `{requested}`.")),
        )
        .permissions(def.permissions);
        descriptor.params = specs;
        descriptor.dependencies = def.depends;

        ScriptTool {
            descriptor,
            body: def.body.into(),
            max_steps: self.max_steps,
        }
    }

    fn finish(&self, name: &str, mut diagnostics: Vec<Diagnostic>) -> Result<(), ToolError> {
        if diagnostics.is_empty() {
            return Ok(());
        }
        diagnostics.sort_by_key(|diag| diag.pos);
        debug!(
            tool = %name,
            total = diagnostics.len(),
            "script compilation failed"
        );
        Err(ToolError::Compilation {
            diagnostics: diagnostics
                .iter()
                .take(self.max_diagnostics)
                .map(ToString::to_string)
                .collect(),
        })
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Compiled artifacts
// ---------------------------------------------------------------------------

/// A tool whose body is an interpreted script.
pub struct ScriptTool {
    descriptor: ToolDescriptor,
    body: Arc<[Stmt]>,
    max_steps: u64,
}

#[async_trait]
impl Tool for ScriptTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, params: &ParamMap, ctx: &ToolContext) -> Result<Value, ToolError> {
        let mut interp = Interpreter::new(ctx, ctx.cancellation(), self.max_steps);
        for spec in &self.descriptor.params {
            let value = params
                .get(&spec.name)
                .map(|value| value.to_json())
                .unwrap_or(Value::Null);
            interp.bind(&spec.name, value);
        }
        let all: Map<String, Value> = params
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        interp.bind("params", Value::Object(all));
        Ok(interp.run(&self.body).await?)
    }
}

/// Checked one-shot code, ready to run.
#[derive(Debug, Clone)]
pub struct OneShotScript {
    body: Vec<Stmt>,
    max_steps: u64,
}

impl OneShotScript {
    pub async fn run(
        &self,
        host: &dyn ScriptHost,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let mut interp = Interpreter::new(host, cancel, self.max_steps);
        interp.bind("params", Value::Object(Map::new()));
        Ok(interp.run(&self.body).await?)
    }
}

// ---------------------------------------------------------------------------
// Semantic checks
// ---------------------------------------------------------------------------

fn check_body(body: &[Stmt], globals: &[&str], diagnostics: &mut Vec<Diagnostic>) {
    let mut checker = Checker {
        scopes: vec![globals.iter().map(|name| name.to_string()).collect()],
        diagnostics,
    };
    checker.block(body, None);
}

struct Checker<'d> {
    scopes: Vec<HashSet<String>>,
    diagnostics: &'d mut Vec<Diagnostic>,
}

impl Checker<'_> {
    fn defined(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.contains(name))
    }

    fn block(&mut self, stmts: &[Stmt], binding: Option<&str>) {
        let mut scope = HashSet::new();
        if let Some(name) = binding {
            scope.insert(name.to_string());
        }
        self.scopes.push(scope);
        for stmt in stmts {
            self.stmt(stmt);
        }
        self.scopes.pop();
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let(name, value, _) => {
                self.expr(value);
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone());
                }
            }
            Stmt::Assign {
                root,
                path,
                value,
                pos,
            } => {
                if !self.defined(root) {
                    self.undefined(root, *pos);
                }
                for segment in path {
                    if let PathSegment::Index(index) = segment {
                        self.expr(index);
                    }
                }
                self.expr(value);
            }
            Stmt::If(cond, then, otherwise) => {
                self.expr(cond);
                self.block(then, None);
                self.block(otherwise, None);
            }
            Stmt::While(cond, body, _) => {
                self.expr(cond);
                self.block(body, None);
            }
            Stmt::For(var, iterable, body, _) => {
                self.expr(iterable);
                self.block(body, Some(var.as_str()));
            }
            Stmt::Return(value, _) => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            Stmt::Expr(expr, _) => self.expr(expr),
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Null => {}
            Expr::Var(name, pos) => {
                if !self.defined(name) {
                    self.undefined(name, *pos);
                }
            }
            Expr::List(items) => items.iter().for_each(|item| self.expr(item)),
            Expr::Map(entries) => entries.iter().for_each(|(_, value)| self.expr(value)),
            Expr::Index(base, index, _) => {
                self.expr(base);
                self.expr(index);
            }
            Expr::Member(base, _, _) => self.expr(base),
            Expr::Unary(_, operand, _) => self.expr(operand),
            Expr::Binary(_, left, right, _) => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Call(name, args, pos) => {
                match builtin_arity(name) {
                    None => self
                        .diagnostics
                        .push(Diagnostic::new(*pos, format!("unknown function `{name}`"))),
                    Some((min, max)) if args.len() < min || args.len() > max => {
                        let expected = if min == max {
                            min.to_string()
                        } else if max == usize::MAX {
                            format!("at least {min}")
                        } else {
                            format!("{min} to {max}")
                        };
                        self.diagnostics.push(Diagnostic::new(
                            *pos,
                            format!(
                                "`{name}` takes {expected} argument(s), got {}",
                                args.len()
                            ),
                        ));
                    }
                    Some(_) => {}
                }
                args.iter().for_each(|arg| self.expr(arg));
            }
        }
    }

    fn undefined(&mut self, name: &str, pos: Pos) {
        self.diagnostics
            .push(Diagnostic::new(pos, format!("undefined variable `{name}`")));
    }
}
