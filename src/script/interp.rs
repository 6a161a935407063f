//! Tree-walking interpreter over JSON values.
//!
//! Values are plain [`serde_json::Value`]s with value semantics. Every
//! executed statement and loop iteration costs one step against the budget,
//! and the cancellation token is checked on every iteration and host call.
//! Every evaluated value is held to [`MAX_VALUE_BYTES`] and
//! [`MAX_VALUE_DEPTH`], so a few steps cannot build an unbounded value.

use super::parser::{BinOp, Expr, PathSegment, Stmt, UnaryOp};
use super::{render_value, Pos, ScriptHost};
use crate::error::ToolError;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Largest value a script may build, in approximate bytes.
pub const MAX_VALUE_BYTES: usize = 1 << 20;
/// Deepest list/map nesting a script may build.
pub const MAX_VALUE_DEPTH: usize = 64;

/// Built-in functions with their accepted argument counts (min, max).
pub const BUILTINS: &[(&str, usize, usize)] = &[
    ("len", 1, 1),
    ("str", 1, 1),
    ("num", 1, 1),
    ("int", 1, 1),
    ("keys", 1, 1),
    ("push", 2, 2),
    ("contains", 2, 2),
    ("range", 1, 2),
    ("join", 1, 2),
    ("split", 1, 2),
    ("upper", 1, 1),
    ("lower", 1, 1),
    ("log", 0, usize::MAX),
    ("call", 1, 2),
    ("last_result", 1, 1),
];

pub fn builtin_arity(name: &str) -> Option<(usize, usize)> {
    BUILTINS
        .iter()
        .find(|(builtin, _, _)| *builtin == name)
        .map(|(_, min, max)| (*min, *max))
}

/// Numbers with no fractional part are stored as integers so they render
/// as `3`, not `3.0`.
pub fn number(n: f64) -> Value {
    const EXACT: f64 = 9_007_199_254_740_992.0;
    if n.fract() == 0.0 && n.abs() < EXACT {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[derive(Debug)]
pub enum RuntimeError {
    Fault { pos: Pos, message: String },
    StepLimit(u64),
    ValueLimit(String),
    Cancelled,
    Tool { pos: Pos, tool: String, error: ToolError },
}

impl From<RuntimeError> for ToolError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Cancelled => ToolError::Cancelled,
            RuntimeError::Tool {
                error: ToolError::Cancelled,
                ..
            } => ToolError::Cancelled,
            RuntimeError::Fault { pos, message } => ToolError::ExecutionFailed(format!(
                "line {}, col {}: {message}",
                pos.line, pos.col
            )),
            RuntimeError::StepLimit(limit) => {
                ToolError::ExecutionFailed(format!("script exceeded its budget of {limit} steps"))
            }
            RuntimeError::ValueLimit(reason) => {
                ToolError::ExecutionFailed(format!("script value too large: {reason}"))
            }
            RuntimeError::Tool { pos, tool, error } => ToolError::ExecutionFailed(format!(
                "line {}, col {}: call to `{tool}` failed: {error}",
                pos.line, pos.col
            )),
        }
    }
}

type Eval<T> = Result<T, RuntimeError>;

fn fault<T>(pos: Pos, message: impl Into<String>) -> Eval<T> {
    Err(RuntimeError::Fault {
        pos,
        message: message.into(),
    })
}

enum Flow {
    Next,
    Return(Value),
}

/// Resolved assignment path step.
enum Slot {
    Index(i64),
    Key(String),
}

pub struct Interpreter<'a> {
    host: &'a dyn ScriptHost,
    cancel: &'a CancellationToken,
    max_steps: u64,
    steps: u64,
    scopes: Vec<HashMap<String, Value>>,
}

impl<'a> Interpreter<'a> {
    pub fn new(host: &'a dyn ScriptHost, cancel: &'a CancellationToken, max_steps: u64) -> Self {
        Self {
            host,
            cancel,
            max_steps,
            steps: 0,
            scopes: vec![HashMap::new()],
        }
    }

    /// Bind a global before running.
    pub fn bind(&mut self, name: &str, value: Value) {
        if let Some(globals) = self.scopes.first_mut() {
            globals.insert(name.to_string(), value);
        }
    }

    /// Run `body`; the result is the `return` value, or null.
    pub async fn run(mut self, body: &[Stmt]) -> Eval<Value> {
        match self.exec_scoped(body, None).await? {
            Flow::Return(value) => Ok(value),
            Flow::Next => Ok(Value::Null),
        }
    }

    fn charge(&mut self, cost: u64) -> Eval<()> {
        self.steps = self.steps.saturating_add(cost);
        if self.steps > self.max_steps {
            return Err(RuntimeError::StepLimit(self.max_steps));
        }
        Ok(())
    }

    fn check_cancel(&self) -> Eval<()> {
        if self.cancel.is_cancelled() {
            Err(RuntimeError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn lookup(&self, name: &str, pos: Pos) -> Eval<Value> {
        match self.scopes.iter().rev().find_map(|scope| scope.get(name)) {
            Some(value) => Ok(value.clone()),
            None => fault(pos, format!("undefined variable `{name}`")),
        }
    }

    fn variable_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
    }

    fn declare(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    // -- statements ---------------------------------------------------------

    fn exec_scoped<'s>(
        &'s mut self,
        stmts: &'s [Stmt],
        binding: Option<(&'s str, Value)>,
    ) -> BoxFuture<'s, Eval<Flow>> {
        async move {
            let mut scope = HashMap::new();
            if let Some((name, value)) = binding {
                scope.insert(name.to_string(), value);
            }
            self.scopes.push(scope);
            let result = self.exec_stmts(stmts).await;
            self.scopes.pop();
            result
        }
        .boxed()
    }

    async fn exec_stmts(&mut self, stmts: &[Stmt]) -> Eval<Flow> {
        for stmt in stmts {
            self.charge(1)?;
            if let Flow::Return(value) = self.exec_stmt(stmt).await? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Next)
    }

    async fn exec_stmt(&mut self, stmt: &Stmt) -> Eval<Flow> {
        match stmt {
            Stmt::Let(name, expr, _) => {
                let value = self.eval(expr).await?;
                self.declare(name, value);
                Ok(Flow::Next)
            }
            Stmt::Assign {
                root,
                path,
                value,
                pos,
            } => {
                let mut slots = Vec::with_capacity(path.len());
                for segment in path {
                    slots.push(match segment {
                        PathSegment::Key(key) => Slot::Key(key.clone()),
                        PathSegment::Index(expr) => match self.eval(expr).await? {
                            Value::String(key) => Slot::Key(key),
                            other => Slot::Index(integer(&other, *pos)?),
                        },
                    });
                }
                let value = self.eval(value).await?;
                let pos = *pos;
                let Some(target) = self.variable_mut(root) else {
                    return fault(pos, format!("undefined variable `{root}`"));
                };
                *slot_mut(target, &slots, pos)? = value;
                Ok(Flow::Next)
            }
            Stmt::If(cond, then, otherwise) => {
                let branch = if truthy(&self.eval(cond).await?) {
                    then
                } else {
                    otherwise
                };
                self.exec_scoped(branch, None).await
            }
            Stmt::While(cond, body, _) => {
                loop {
                    self.check_cancel()?;
                    self.charge(1)?;
                    if !truthy(&self.eval(cond).await?) {
                        return Ok(Flow::Next);
                    }
                    if let Flow::Return(value) = self.exec_scoped(body, None).await? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            Stmt::For(var, iterable, body, pos) => {
                let items = match self.eval(iterable).await? {
                    Value::Array(items) => items,
                    Value::Object(map) => map.into_iter().map(|(k, _)| Value::String(k)).collect(),
                    Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                    other => return fault(*pos, format!("cannot iterate over {}", kind(&other))),
                };
                for item in items {
                    self.check_cancel()?;
                    self.charge(1)?;
                    if let Flow::Return(value) = self.exec_scoped(body, Some((var.as_str(), item))).await? {
                        return Ok(Flow::Return(value));
                    }
                }
                Ok(Flow::Next)
            }
            Stmt::Return(expr, _) => {
                let value = match expr {
                    Some(expr) => self.eval(expr).await?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Expr(expr, _) => {
                self.eval(expr).await?;
                Ok(Flow::Next)
            }
        }
    }

    // -- expressions --------------------------------------------------------

    fn eval<'s>(&'s mut self, expr: &'s Expr) -> BoxFuture<'s, Eval<Value>> {
        async move {
            let value = self.eval_unchecked(expr).await?;
            check_value_limits(&value)?;
            Ok(value)
        }
        .boxed()
    }

    fn eval_unchecked<'s>(&'s mut self, expr: &'s Expr) -> BoxFuture<'s, Eval<Value>> {
        async move {
            match expr {
                Expr::Number(n) => Ok(number(*n)),
                Expr::Str(s) => Ok(Value::String(s.clone())),
                Expr::Bool(b) => Ok(Value::Bool(*b)),
                Expr::Null => Ok(Value::Null),
                Expr::Var(name, pos) => self.lookup(name, *pos),
                Expr::List(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.eval(item).await?);
                    }
                    Ok(Value::Array(out))
                }
                Expr::Map(entries) => {
                    let mut out = Map::new();
                    for (key, value) in entries {
                        let value = self.eval(value).await?;
                        out.insert(key.clone(), value);
                    }
                    Ok(Value::Object(out))
                }
                Expr::Index(base, index, pos) => {
                    let base = self.eval(base).await?;
                    let index = self.eval(index).await?;
                    index_value(&base, &index, *pos)
                }
                Expr::Member(base, key, pos) => match self.eval(base).await? {
                    Value::Object(map) => Ok(map.get(key).cloned().unwrap_or(Value::Null)),
                    other => fault(*pos, format!("cannot read field `{key}` of {}", kind(&other))),
                },
                Expr::Unary(op, operand, pos) => {
                    let value = self.eval(operand).await?;
                    match op {
                        UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                        UnaryOp::Neg => match value.as_f64() {
                            Some(n) => Ok(number(-n)),
                            None => fault(*pos, format!("cannot negate {}", kind(&value))),
                        },
                    }
                }
                Expr::Binary(BinOp::And, left, right, _) => {
                    if !truthy(&self.eval(left).await?) {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(truthy(&self.eval(right).await?)))
                }
                Expr::Binary(BinOp::Or, left, right, _) => {
                    if truthy(&self.eval(left).await?) {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(truthy(&self.eval(right).await?)))
                }
                Expr::Binary(op, left, right, pos) => {
                    let left = self.eval(left).await?;
                    let right = self.eval(right).await?;
                    binary(*op, left, right, *pos)
                }
                Expr::Call(name, args, pos) => self.call(name, args, *pos).await,
            }
        }
        .boxed()
    }

    async fn eval_args(&mut self, args: &[Expr]) -> Eval<Vec<Value>> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            out.push(self.eval(arg).await?);
        }
        Ok(out)
    }

    async fn call(&mut self, name: &str, args: &[Expr], pos: Pos) -> Eval<Value> {
        match builtin_arity(name) {
            Some((min, max)) if args.len() < min || args.len() > max => {
                return fault(pos, format!("wrong number of arguments to `{name}`"));
            }
            Some(_) => {}
            None => return fault(pos, format!("unknown function `{name}`")),
        }

        // `push` appends in place when its target is a variable.
        if name == "push" {
            let item = self.eval(&args[1]).await?;
            if let Expr::Var(var, var_pos) = &args[0] {
                let target = match self.variable_mut(var) {
                    Some(target) => target,
                    None => return fault(*var_pos, format!("undefined variable `{var}`")),
                };
                let Value::Array(items) = target else {
                    return fault(pos, "push expects a list");
                };
                items.push(item);
                return Ok(Value::Array(items.clone()));
            }
            return match self.eval(&args[0]).await? {
                Value::Array(mut items) => {
                    items.push(item);
                    Ok(Value::Array(items))
                }
                _ => fault(pos, "push expects a list"),
            };
        }

        let values = self.eval_args(args).await?;
        match name {
            "len" => match &values[0] {
                Value::String(s) => Ok(Value::from(s.chars().count())),
                Value::Array(items) => Ok(Value::from(items.len())),
                Value::Object(map) => Ok(Value::from(map.len())),
                other => fault(pos, format!("len expects a string, list or map, got {}", kind(other))),
            },
            "str" => Ok(Value::String(render_value(&values[0]))),
            "num" => match &values[0] {
                Value::Number(_) => Ok(values[0].clone()),
                Value::String(s) => match s.trim().parse::<f64>() {
                    Ok(n) if n.is_finite() => Ok(number(n)),
                    _ => fault(pos, format!("cannot convert \"{s}\" to a number")),
                },
                Value::Bool(b) => Ok(Value::from(u8::from(*b))),
                other => fault(pos, format!("cannot convert {} to a number", kind(other))),
            },
            "int" => {
                let n = match &values[0] {
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    other => other.as_f64(),
                };
                match n.filter(|n| n.is_finite()) {
                    Some(n) => Ok(Value::from(n.trunc() as i64)),
                    None => fault(pos, format!("cannot convert {} to an integer", kind(&values[0]))),
                }
            }
            "keys" => match &values[0] {
                Value::Object(map) => Ok(Value::Array(
                    map.keys().cloned().map(Value::String).collect(),
                )),
                other => fault(pos, format!("keys expects a map, got {}", kind(other))),
            },
            "contains" => match (&values[0], &values[1]) {
                (Value::Array(items), needle) => {
                    Ok(Value::Bool(items.iter().any(|item| values_equal(item, needle))))
                }
                (Value::Object(map), Value::String(key)) => Ok(Value::Bool(map.contains_key(key))),
                (Value::String(hay), Value::String(needle)) => {
                    Ok(Value::Bool(hay.contains(needle.as_str())))
                }
                (other, _) => fault(pos, format!("contains expects a list, map or string, got {}", kind(other))),
            },
            "range" => {
                let (start, end) = match values.as_slice() {
                    [end] => (0, integer(end, pos)?),
                    [start, end] => (integer(start, pos)?, integer(end, pos)?),
                    _ => return fault(pos, "range expects one or two arguments"),
                };
                let count = end.saturating_sub(start).max(0);
                self.charge(u64::try_from(count).unwrap_or(u64::MAX))?;
                if usize::try_from(count).map_or(true, |n| n > MAX_VALUE_BYTES / 8) {
                    return Err(RuntimeError::ValueLimit(format!("range of {count} items")));
                }
                Ok(Value::Array((start..end).map(Value::from).collect()))
            }
            "join" => {
                let separator = match values.get(1) {
                    Some(Value::String(sep)) => sep.clone(),
                    Some(other) => return fault(pos, format!("join separator must be a string, got {}", kind(other))),
                    None => String::new(),
                };
                match &values[0] {
                    Value::Array(items) => Ok(Value::String(
                        items.iter().map(render_value).collect::<Vec<_>>().join(&separator),
                    )),
                    other => fault(pos, format!("join expects a list, got {}", kind(other))),
                }
            }
            "split" => {
                let Value::String(text) = &values[0] else {
                    return fault(pos, format!("split expects a string, got {}", kind(&values[0])));
                };
                let parts: Vec<Value> = match values.get(1) {
                    Some(Value::String(sep)) if !sep.is_empty() => {
                        text.split(sep.as_str()).map(|p| Value::String(p.to_string())).collect()
                    }
                    None => text
                        .split_whitespace()
                        .map(|p| Value::String(p.to_string()))
                        .collect(),
                    Some(_) => return fault(pos, "split separator must be a non-empty string"),
                };
                Ok(Value::Array(parts))
            }
            "upper" | "lower" => match &values[0] {
                Value::String(s) if name == "upper" => Ok(Value::String(s.to_uppercase())),
                Value::String(s) => Ok(Value::String(s.to_lowercase())),
                other => fault(pos, format!("{name} expects a string, got {}", kind(other))),
            },
            "log" => {
                let line = values.iter().map(render_value).collect::<Vec<_>>().join(" ");
                self.host.log(&line);
                Ok(Value::Null)
            }
            "call" => {
                let Value::String(tool) = &values[0] else {
                    return fault(pos, "call expects a tool name string");
                };
                let args = match values.get(1) {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(map)) => map.clone(),
                    Some(other) => {
                        return fault(pos, format!("call arguments must be a map, got {}", kind(other)))
                    }
                };
                self.check_cancel()?;
                self.host
                    .call_tool(tool, &args)
                    .await
                    .map_err(|error| RuntimeError::Tool {
                        pos,
                        tool: tool.clone(),
                        error,
                    })
            }
            "last_result" => match &values[0] {
                Value::String(tool) => Ok(self.host.last_result(tool).unwrap_or(Value::Null)),
                _ => fault(pos, "last_result expects a tool name string"),
            },
            _ => fault(pos, format!("unknown function `{name}`")),
        }
    }
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Walks `value` without recursion, stopping as soon as a limit is passed.
fn check_value_limits(value: &Value) -> Eval<()> {
    let mut bytes = 0usize;
    let mut pending = vec![(value, 1usize)];
    while let Some((value, depth)) = pending.pop() {
        if depth > MAX_VALUE_DEPTH {
            return Err(RuntimeError::ValueLimit(format!(
                "nested deeper than {MAX_VALUE_DEPTH} levels"
            )));
        }
        bytes = bytes.saturating_add(match value {
            Value::String(s) => s.len(),
            Value::Array(items) => 8 * items.len(),
            Value::Object(map) => map.keys().map(|k| k.len() + 8).sum(),
            _ => 8,
        });
        if bytes > MAX_VALUE_BYTES {
            return Err(RuntimeError::ValueLimit(format!(
                "larger than {MAX_VALUE_BYTES} bytes"
            )));
        }
        match value {
            Value::Array(items) => pending.extend(items.iter().map(|item| (item, depth + 1))),
            Value::Object(map) => pending.extend(map.values().map(|item| (item, depth + 1))),
            _ => {}
        }
    }
    Ok(())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn integer(value: &Value, pos: Pos) -> Eval<i64> {
    match value.as_f64() {
        Some(n) if n.fract() == 0.0 => Ok(n as i64),
        _ => fault(pos, format!("expected an integer, got {}", render_value(value))),
    }
}

fn list_index(len: usize, index: i64) -> Option<usize> {
    let resolved = if index < 0 {
        i64::try_from(len).ok()? + index
    } else {
        index
    };
    usize::try_from(resolved).ok().filter(|i| *i < len)
}

fn index_value(base: &Value, index: &Value, pos: Pos) -> Eval<Value> {
    match (base, index) {
        (Value::Array(items), index) => {
            let i = integer(index, pos)?;
            match list_index(items.len(), i) {
                Some(i) => Ok(items[i].clone()),
                None => fault(pos, format!("index {i} out of range for list of length {}", items.len())),
            }
        }
        (Value::Object(map), Value::String(key)) => Ok(map.get(key).cloned().unwrap_or(Value::Null)),
        (Value::String(text), index) => {
            let i = integer(index, pos)?;
            let chars: Vec<char> = text.chars().collect();
            match list_index(chars.len(), i) {
                Some(i) => Ok(Value::String(chars[i].to_string())),
                None => fault(pos, format!("index {i} out of range for string of length {}", chars.len())),
            }
        }
        (other, index) => fault(pos, format!("cannot index {} with {}", kind(other), kind(index))),
    }
}

fn slot_mut<'v>(mut target: &'v mut Value, slots: &[Slot], pos: Pos) -> Eval<&'v mut Value> {
    for slot in slots {
        target = match (target, slot) {
            (Value::Array(items), Slot::Index(i)) => {
                let len = items.len();
                match list_index(len, *i) {
                    Some(i) => &mut items[i],
                    None => return fault(pos, format!("index {i} out of range for list of length {len}")),
                }
            }
            (Value::Object(map), Slot::Key(key)) => map.entry(key.clone()).or_insert(Value::Null),
            (other, _) => return fault(pos, format!("cannot assign into {}", kind(other))),
        };
    }
    Ok(target)
}

fn binary(op: BinOp, left: Value, right: Value, pos: Pos) -> Eval<Value> {
    match op {
        BinOp::Eq => return Ok(Value::Bool(values_equal(&left, &right))),
        BinOp::Ne => return Ok(Value::Bool(!values_equal(&left, &right))),
        BinOp::Add => match (&left, &right) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                return Ok(Value::String(render_value(&left) + &render_value(&right)))
            }
            (Value::Array(a), Value::Array(b)) => {
                return Ok(Value::Array(a.iter().chain(b).cloned().collect()))
            }
            _ => {}
        },
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            if let (Value::String(a), Value::String(b)) = (&left, &right) {
                return Ok(Value::Bool(compare(op, a.cmp(b))));
            }
        }
        _ => {}
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return fault(
            pos,
            format!("unsupported operands {} and {}", kind(&left), kind(&right)),
        );
    };
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div | BinOp::Rem if b == 0.0 => return fault(pos, "division by zero"),
        BinOp::Div => a / b,
        BinOp::Rem => a % b,
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let Some(ordering) = a.partial_cmp(&b) else {
                return fault(pos, "cannot compare NaN");
            };
            return Ok(Value::Bool(compare(op, ordering)));
        }
        BinOp::Eq | BinOp::Ne | BinOp::And | BinOp::Or => {
            return fault(pos, "unexpected operator");
        }
    };
    Ok(number(result))
}

fn compare(op: BinOp, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};
    match op {
        BinOp::Lt => ordering == Less,
        BinOp::Le => ordering != Greater,
        BinOp::Gt => ordering == Greater,
        BinOp::Ge => ordering != Less,
        _ => ordering == Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::lexer::tokenize;
    use crate::script::parser::{parse, Program};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHost {
        calls: Mutex<Vec<(String, Value)>>,
        logs: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ScriptHost for RecordingHost {
        async fn call_tool(&self, name: &str, args: &Map<String, Value>) -> Result<Value, ToolError> {
            if name == "broken" {
                return Err(ToolError::ExecutionFailed("nope".into()));
            }
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), Value::Object(args.clone())));
            Ok(json!({ "tool": name }))
        }

        fn last_result(&self, tool: &str) -> Option<Value> {
            (tool == "time").then(|| json!("12:00"))
        }

        fn log(&self, message: &str) {
            self.logs.lock().unwrap().push(message.to_string());
        }
    }

    async fn run_with(source: &str, host: &RecordingHost, max_steps: u64) -> Eval<Value> {
        let mut diagnostics = Vec::new();
        let tokens = tokenize(source, &mut diagnostics);
        let Program::Body(body) = parse(tokens, &mut diagnostics) else {
            panic!("expected body");
        };
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let cancel = CancellationToken::new();
        Interpreter::new(host, &cancel, max_steps).run(&body).await
    }

    async fn eval(source: &str) -> Value {
        run_with(source, &RecordingHost::default(), 10_000)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn arithmetic_and_strings() {
        assert_eq!(eval("return 1 + 2 * 3;").await, json!(7));
        assert_eq!(eval("return 7 / 2;").await, json!(3.5));
        assert_eq!(eval("return 7 % 4 - -1;").await, json!(4));
        assert_eq!(eval("return \"n=\" + 3;").await, json!("n=3"));
        assert_eq!(eval("return upper(\"ab\") + lower(\"CD\");").await, json!("ABcd"));
    }

    #[tokio::test]
    async fn loops_lists_and_maps() {
        let source = r#"
            let total = 0;
            let seen = [];
            for i in range(1, 5) {
                total = total + i;
                push(seen, i * i);
            }
            let point = { x: 1, y: 2 };
            point.x = 10;
            seen[0] = -1;
            let n = 0;
            while n < 3 { n = n + 1; }
            return { total: total, seen: seen, point: point, n: n, k: keys(point) };
        "#;
        assert_eq!(
            eval(source).await,
            json!({
                "total": 10,
                "seen": [-1, 4, 9, 16],
                "point": { "x": 10, "y": 2 },
                "n": 3,
                "k": ["x", "y"]
            })
        );
    }

    #[tokio::test]
    async fn conditionals_and_builtins() {
        let source = r#"
            let words = split("a,b,c", ",");
            if contains(words, "b") and not contains(words, "z") {
                return join(words, "-") + str(len(words));
            } else {
                return "no";
            }
        "#;
        assert_eq!(eval(source).await, json!("a-b-c3"));
        assert_eq!(eval("return int(\"4.9\") + num(\"0.5\");").await, json!(4.5));
        assert_eq!(eval("return [1, 2][-1];").await, json!(2));
    }

    #[tokio::test]
    async fn block_scoped_bindings_do_not_leak() {
        let err = run_with("if true { let x = 1; } return x;", &RecordingHost::default(), 100)
            .await
            .unwrap_err();
        assert_eq!(
            ToolError::from(err).to_string(),
            "execution failed: line 1, col 31: undefined variable `x`"
        );
    }

    #[tokio::test]
    async fn host_calls_and_logging() {
        let host = RecordingHost::default();
        let value = run_with(
            r#"log("starting", 1); let r = call("spawn", { kind: "Cube" }); return [r, last_result("time")];"#,
            &host,
            100,
        )
        .await
        .unwrap();
        assert_eq!(value, json!([{ "tool": "spawn" }, "12:00"]));
        assert_eq!(host.logs.lock().unwrap().as_slice(), ["starting 1"]);
        assert_eq!(
            host.calls.lock().unwrap().as_slice(),
            [("spawn".to_string(), json!({ "kind": "Cube" }))]
        );
    }

    #[tokio::test]
    async fn failing_host_call_reports_position() {
        let err = run_with("call(\"broken\");", &RecordingHost::default(), 100)
            .await
            .unwrap_err();
        assert_eq!(
            ToolError::from(err).to_string(),
            "execution failed: line 1, col 1: call to `broken` failed: execution failed: nope"
        );
    }

    #[tokio::test]
    async fn runaway_loop_hits_step_budget() {
        let err = run_with("while true { }", &RecordingHost::default(), 50)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::StepLimit(50)));
    }

    #[tokio::test]
    async fn doubling_strings_and_lists_stop_at_the_value_limit() {
        let host = RecordingHost::default();
        let err = run_with(
            "let s = \"x\"; for i in range(40) { s = s + s; } return len(s);",
            &host,
            100_000,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RuntimeError::ValueLimit(_)), "{err:?}");
        assert_eq!(
            ToolError::from(err).to_string(),
            format!("execution failed: script value too large: larger than {MAX_VALUE_BYTES} bytes")
        );

        let err = run_with("let a = [1]; while true { a = a + a; }", &host, 100_000)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ValueLimit(_)), "{err:?}");

        let err = run_with("let a = [0]; while true { a = [a, a]; }", &host, 100_000)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ValueLimit(_)), "{err:?}");
    }

    #[tokio::test]
    async fn self_nesting_stops_at_the_depth_limit() {
        let err = run_with("let a = []; while true { a = [a]; }", &RecordingHost::default(), 100_000)
            .await
            .unwrap_err();
        let RuntimeError::ValueLimit(reason) = &err else {
            panic!("expected value limit, got {err:?}");
        };
        assert_eq!(*reason, format!("nested deeper than {MAX_VALUE_DEPTH} levels"));
    }

    #[tokio::test]
    async fn huge_ranges_are_refused_before_allocating() {
        let err = run_with("return range(1000000000);", &RecordingHost::default(), u64::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ValueLimit(_)), "{err:?}");
    }

    #[tokio::test]
    async fn cancellation_stops_loops() {
        let mut diagnostics = Vec::new();
        let Program::Body(body) = parse(tokenize("while true { }", &mut diagnostics), &mut diagnostics) else {
            panic!("expected body");
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let host = RecordingHost::default();
        let err = Interpreter::new(&host, &cancel, 1_000).run(&body).await.unwrap_err();
        assert_eq!(ToolError::from(err), ToolError::Cancelled);
    }

    #[tokio::test]
    async fn runtime_faults_are_positioned() {
        let err = run_with("let x = 1;\nreturn x / 0;", &RecordingHost::default(), 100)
            .await
            .unwrap_err();
        assert_eq!(
            ToolError::from(err).to_string(),
            "execution failed: line 2, col 10: division by zero"
        );
    }

    #[test]
    fn number_normalizes_integral_floats() {
        assert_eq!(number(3.0), json!(3));
        assert_eq!(number(2.5), json!(2.5));
        assert_eq!(number(f64::NAN), Value::Null);
    }
}
