//! Recursive-descent parser producing the script syntax tree.
//!
//! The parser never stops at the first error. A failed statement is reported
//! and skipped up to the next `;` or closing brace, so one compile reports
//! every independent syntax problem.

use super::lexer::{Token, TokenKind};
use super::{Diagnostic, Pos};
use crate::tools::{ParamType, Permissions};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Syntax tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Var(String, Pos),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Index(Box<Expr>, Box<Expr>, Pos),
    Member(Box<Expr>, String, Pos),
    Unary(UnaryOp, Box<Expr>, Pos),
    Binary(BinOp, Box<Expr>, Box<Expr>, Pos),
    Call(String, Vec<Expr>, Pos),
}

/// One step of an assignment path: `xs[0]` or `point.x`.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Index(Expr),
    Key(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let(String, Expr, Pos),
    Assign {
        root: String,
        path: Vec<PathSegment>,
        value: Expr,
        pos: Pos,
    },
    If(Expr, Vec<Stmt>, Vec<Stmt>),
    While(Expr, Vec<Stmt>, Pos),
    For(String, Expr, Vec<Stmt>, Pos),
    Return(Option<Expr>, Pos),
    Expr(Expr, Pos),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    pub pos: Pos,
}

/// A complete `tool NAME { ... }` definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDef {
    pub name: String,
    pub pos: Pos,
    pub description: Option<String>,
    pub permissions: Permissions,
    pub params: Vec<ParamDecl>,
    pub depends: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Program {
    Tool(ToolDef),
    Body(Vec<Stmt>),
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Deepest nesting of blocks, sub-expressions and operator chains accepted.
pub const MAX_NESTING: usize = 64;

/// Marker for a reported, already-recorded syntax error.
struct Reported;

type PResult<T> = Result<T, Reported>;

pub fn parse(tokens: Vec<Token>, diagnostics: &mut Vec<Diagnostic>) -> Program {
    let mut parser = Parser {
        tokens,
        index: 0,
        depth: 0,
        diagnostics,
    };
    if parser.check(&TokenKind::Tool) {
        Program::Tool(parser.tool_def())
    } else {
        Program::Body(parser.statements_until_eof())
    }
}

struct Parser<'d> {
    tokens: Vec<Token>,
    index: usize,
    /// Current nesting level; every syntax tree edge adds at most one.
    depth: usize,
    diagnostics: &'d mut Vec<Diagnostic>,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        // `tokenize` always terminates the stream with `Eof`.
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn pos(&self) -> Pos {
        self.peek().pos
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.at_eof() {
            self.index += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error<T>(&mut self, pos: Pos, message: impl Into<String>) -> PResult<T> {
        self.diagnostics.push(Diagnostic::new(pos, message));
        Err(Reported)
    }

    fn expect(&mut self, kind: &TokenKind, context: &str) -> PResult<Token> {
        if self.check(kind) {
            return Ok(self.advance());
        }
        let found = self.peek_kind().describe();
        let pos = self.pos();
        self.error(pos, format!("expected {} {context}, found {found}", kind.describe()))
    }

    fn ident(&mut self, context: &str) -> PResult<(String, Pos)> {
        let pos = self.pos();
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok((name, pos))
            }
            other => self.error(pos, format!("expected {context}, found {}", other.describe())),
        }
    }

    /// Take one nesting level; it is handed back by the enclosing `nested`
    /// or statement.
    fn nest(&mut self) -> PResult<()> {
        if self.depth >= MAX_NESTING {
            let pos = self.pos();
            return self.error(pos, format!("nesting too deep (limit {MAX_NESTING})"));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        let saved = self.depth;
        let result = self.nest().and_then(|_| parse(self));
        self.depth = saved;
        result
    }

    /// Skip to just past the next `;`, or up to (not past) a `}`.
    fn synchronize(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek_kind() {
                TokenKind::Eof => return,
                TokenKind::Semi if depth == 0 => {
                    self.advance();
                    return;
                }
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace if depth == 0 => return,
                TokenKind::RBrace => depth -= 1,
                _ => {}
            }
            self.advance();
        }
    }

    /// `;` terminates a simple statement; it may be omitted before `}` or EOF.
    fn end_statement(&mut self) -> PResult<()> {
        if self.eat(&TokenKind::Semi)
            || matches!(self.peek_kind(), TokenKind::RBrace | TokenKind::Eof)
        {
            return Ok(());
        }
        let found = self.peek_kind().describe();
        let pos = self.pos();
        self.error(pos, format!("expected `;` after statement, found {found}"))
    }

    // -- statements ---------------------------------------------------------

    fn statements_until_eof(&mut self) -> Vec<Stmt> {
        let mut out = Vec::new();
        while !self.at_eof() {
            if self.check(&TokenKind::RBrace) {
                let pos = self.pos();
                let _ = self.error::<()>(pos, "unexpected `}`");
                self.advance();
                continue;
            }
            self.statement_into(&mut out);
        }
        out
    }

    fn statement_into(&mut self, out: &mut Vec<Stmt>) {
        let start = self.index;
        let saved = self.depth;
        let parsed = self.statement();
        self.depth = saved;
        match parsed {
            Ok(stmt) => out.push(stmt),
            Err(Reported) => {
                self.synchronize();
                if self.index == start && !self.at_eof() && !self.check(&TokenKind::RBrace) {
                    self.advance();
                }
            }
        }
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.nested(Self::block_body)
    }

    fn block_body(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(&TokenKind::LBrace, "to open a block")?;
        let mut out = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.at_eof() {
                let pos = self.pos();
                return self.error(pos, "expected `}` to close block, found end of input");
            }
            self.statement_into(&mut out);
        }
        self.advance();
        Ok(out)
    }

    fn statement(&mut self) -> PResult<Stmt> {
        let pos = self.pos();
        match self.peek_kind() {
            TokenKind::Let => {
                self.advance();
                let (name, _) = self.ident("variable name after `let`")?;
                self.expect(&TokenKind::Assign, "after variable name")?;
                let value = self.expression()?;
                self.end_statement()?;
                Ok(Stmt::Let(name, value, pos))
            }
            TokenKind::If => self.if_statement(),
            TokenKind::While => {
                self.advance();
                let cond = self.expression()?;
                let body = self.block()?;
                Ok(Stmt::While(cond, body, pos))
            }
            TokenKind::For => {
                self.advance();
                let (var, _) = self.ident("loop variable after `for`")?;
                self.expect(&TokenKind::In, "after loop variable")?;
                let iterable = self.expression()?;
                let body = self.block()?;
                Ok(Stmt::For(var, iterable, body, pos))
            }
            TokenKind::Return => {
                self.advance();
                let value = if matches!(
                    self.peek_kind(),
                    TokenKind::Semi | TokenKind::RBrace | TokenKind::Eof
                ) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_statement()?;
                Ok(Stmt::Return(value, pos))
            }
            TokenKind::Tool => self.error(pos, "tool definitions are only allowed at the top level"),
            _ => {
                let expr = self.expression()?;
                if self.eat(&TokenKind::Assign) {
                    let (root, path) = match into_place(expr) {
                        Some(place) => place,
                        None => return self.error(pos, "invalid assignment target"),
                    };
                    let value = self.expression()?;
                    self.end_statement()?;
                    return Ok(Stmt::Assign {
                        root,
                        path,
                        value,
                        pos,
                    });
                }
                self.end_statement()?;
                Ok(Stmt::Expr(expr, pos))
            }
        }
    }

    fn if_statement(&mut self) -> PResult<Stmt> {
        self.expect(&TokenKind::If, "")?;
        let cond = self.expression()?;
        let then = self.block()?;
        let otherwise = if self.eat(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                self.nest()?;
                vec![self.if_statement()?]
            } else {
                self.block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If(cond, then, otherwise))
    }

    // -- tool definitions ---------------------------------------------------

    fn tool_def(&mut self) -> ToolDef {
        let pos = self.pos();
        self.advance();
        let mut def = ToolDef {
            name: String::new(),
            pos,
            description: None,
            permissions: Permissions::NONE,
            params: Vec::new(),
            depends: Vec::new(),
            body: Vec::new(),
        };
        let mut saw_run = false;
        let header = self
            .ident("tool name after `tool`")
            .and_then(|(name, name_pos)| {
                def.name = name;
                def.pos = name_pos;
                self.expect(&TokenKind::LBrace, "after tool name").map(|_| ())
            });
        if header.is_err() {
            return def;
        }

        while !self.check(&TokenKind::RBrace) {
            if self.at_eof() {
                let pos = self.pos();
                let _ = self.error::<()>(pos, "expected `}` to close tool definition");
                return def;
            }
            let start = self.index;
            if let Err(Reported) = self.tool_item(&mut def, &mut saw_run) {
                self.synchronize();
                if self.index == start && !self.check(&TokenKind::RBrace) {
                    self.advance();
                }
            }
        }
        self.advance();

        if !saw_run {
            self.diagnostics.push(Diagnostic::new(
                def.pos,
                format!("tool `{}` has no `run` block", def.name),
            ));
        }
        if !self.at_eof() {
            let pos = self.pos();
            self.diagnostics
                .push(Diagnostic::new(pos, "unexpected input after tool definition"));
        }
        def
    }

    fn tool_item(&mut self, def: &mut ToolDef, saw_run: &mut bool) -> PResult<()> {
        let (item, pos) = self.ident("`description`, `permission`, `param`, `depends` or `run`")?;
        match item.as_str() {
            "description" => {
                let text = match self.peek_kind().clone() {
                    TokenKind::Str(text) => {
                        self.advance();
                        text
                    }
                    other => {
                        let pos = self.pos();
                        return self.error(
                            pos,
                            format!("expected string after `description`, found {}", other.describe()),
                        );
                    }
                };
                def.description = Some(text);
                self.end_statement()
            }
            "permission" | "permissions" => {
                loop {
                    let (name, name_pos) = self.ident("permission name")?;
                    match Permissions::from_name(&name) {
                        Some(bits) => def.permissions = def.permissions | bits,
                        None => {
                            return self.error(
                                name_pos,
                                format!("unknown permission `{name}` (expected read, write, delete or none)"),
                            )
                        }
                    }
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.end_statement()
            }
            "param" => {
                let decl = self.param_decl()?;
                def.params.push(decl);
                self.end_statement()
            }
            "depends" => {
                loop {
                    let (name, _) = self.ident("tool name after `depends`")?;
                    def.depends.push(name);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.end_statement()
            }
            "run" => {
                if *saw_run {
                    return self.error(pos, "duplicate `run` block");
                }
                *saw_run = true;
                def.body = self.block()?;
                Ok(())
            }
            other => self.error(pos, format!("unknown tool item `{other}`")),
        }
    }

    fn param_decl(&mut self) -> PResult<ParamDecl> {
        let (name, pos) = self.ident("parameter name")?;
        let optional = self.eat(&TokenKind::Question);
        self.expect(&TokenKind::Colon, "after parameter name")?;
        let param_type = self.param_type()?;
        let default = if self.eat(&TokenKind::Assign) {
            let value_pos = self.pos();
            let expr = self.expression()?;
            match const_value(&expr) {
                Some(value) => Some(value),
                None => return self.error(value_pos, "parameter default must be a literal"),
            }
        } else {
            None
        };
        Ok(ParamDecl {
            name,
            param_type,
            required: !optional && default.is_none(),
            default,
            pos,
        })
    }

    fn param_type(&mut self) -> PResult<ParamType> {
        let (name, pos) = self.ident("parameter type")?;
        let param_type = match name.as_str() {
            "string" | "str" => ParamType::String,
            "integer" | "int" => ParamType::Integer,
            "number" | "float" => ParamType::Number,
            "bool" | "boolean" => ParamType::Boolean,
            "vec2" => ParamType::Vector { dims: 2 },
            "vec3" | "vector" => ParamType::Vector { dims: 3 },
            "vec4" => ParamType::Vector { dims: 4 },
            "json" | "any" => ParamType::Json,
            "enum" => {
                self.expect(&TokenKind::LParen, "after `enum`")?;
                let mut variants = Vec::new();
                loop {
                    let (variant, _) = self.ident("enum variant")?;
                    variants.push(variant);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RParen, "to close enum variants")?;
                ParamType::Enum { variants }
            }
            other => return self.error(pos, format!("unknown parameter type `{other}`")),
        };
        Ok(param_type)
    }

    // -- expressions --------------------------------------------------------

    fn expression(&mut self) -> PResult<Expr> {
        self.nested(Self::or_expr)
    }

    fn or_expr(&mut self) -> PResult<Expr> {
        let mut left = self.and_expr()?;
        while self.check(&TokenKind::Or) {
            let pos = self.advance().pos;
            self.nest()?;
            let right = self.and_expr()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right), pos);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> PResult<Expr> {
        let mut left = self.not_expr()?;
        while self.check(&TokenKind::And) {
            let pos = self.advance().pos;
            self.nest()?;
            let right = self.not_expr()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right), pos);
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> PResult<Expr> {
        if self.check(&TokenKind::Not) {
            let pos = self.advance().pos;
            self.nest()?;
            let operand = self.not_expr()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand), pos));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Eq => BinOp::Eq,
                TokenKind::Ne => BinOp::Ne,
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Ge => BinOp::Ge,
                _ => return Ok(left),
            };
            let pos = self.advance().pos;
            self.nest()?;
            let right = self.additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right), pos);
        }
    }

    fn additive(&mut self) -> PResult<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(left),
            };
            let pos = self.advance().pos;
            self.nest()?;
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right), pos);
        }
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Rem,
                _ => return Ok(left),
            };
            let pos = self.advance().pos;
            self.nest()?;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right), pos);
        }
    }

    fn unary(&mut self) -> PResult<Expr> {
        if self.check(&TokenKind::Minus) {
            let pos = self.advance().pos;
            self.nest()?;
            let operand = self.unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand), pos));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::LBracket => {
                    let pos = self.advance().pos;
                    self.nest()?;
                    let index = self.expression()?;
                    self.expect(&TokenKind::RBracket, "to close index")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index), pos);
                }
                TokenKind::Dot => {
                    let pos = self.advance().pos;
                    self.nest()?;
                    let (key, _) = self.ident("field name after `.`")?;
                    expr = Expr::Member(Box::new(expr), key, pos);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Null)
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.eat(&TokenKind::LParen) {
                    let args = self.comma_list(&TokenKind::RParen, Self::expression)?;
                    Ok(Expr::Call(name, args, token.pos))
                } else {
                    Ok(Expr::Var(name, token.pos))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(&TokenKind::RParen, "to close parenthesis")?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                self.advance();
                let items = self.comma_list(&TokenKind::RBracket, Self::expression)?;
                Ok(Expr::List(items))
            }
            TokenKind::LBrace => {
                self.advance();
                let entries = self.comma_list(&TokenKind::RBrace, Self::map_entry)?;
                Ok(Expr::Map(entries))
            }
            other => self.error(
                token.pos,
                format!("expected expression, found {}", other.describe()),
            ),
        }
    }

    fn map_entry(&mut self) -> PResult<(String, Expr)> {
        let pos = self.pos();
        let key = match self.peek_kind().clone() {
            TokenKind::Ident(key) | TokenKind::Str(key) => {
                self.advance();
                key
            }
            other => {
                return self.error(pos, format!("expected map key, found {}", other.describe()))
            }
        };
        self.expect(&TokenKind::Colon, "after map key")?;
        Ok((key, self.expression()?))
    }

    /// Comma-separated items up to `close`; a trailing comma is allowed.
    fn comma_list<T>(
        &mut self,
        close: &TokenKind,
        mut item: impl FnMut(&mut Self) -> PResult<T>,
    ) -> PResult<Vec<T>> {
        let mut out = Vec::new();
        while !self.check(close) {
            out.push(item(self)?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(close, "to close list")?;
        Ok(out)
    }
}

fn into_place(expr: Expr) -> Option<(String, Vec<PathSegment>)> {
    match expr {
        Expr::Var(name, _) => Some((name, Vec::new())),
        Expr::Index(base, index, _) => {
            let (root, mut path) = into_place(*base)?;
            path.push(PathSegment::Index(*index));
            Some((root, path))
        }
        Expr::Member(base, key, _) => {
            let (root, mut path) = into_place(*base)?;
            path.push(PathSegment::Key(key));
            Some((root, path))
        }
        _ => None,
    }
}

/// Evaluate a literal expression at compile time.
pub fn const_value(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Number(n) => Some(super::interp::number(*n)),
        Expr::Str(s) => Some(Value::String(s.clone())),
        Expr::Bool(b) => Some(Value::Bool(*b)),
        Expr::Null => Some(Value::Null),
        Expr::Unary(UnaryOp::Neg, inner, _) => match inner.as_ref() {
            Expr::Number(n) => Some(super::interp::number(-n)),
            _ => None,
        },
        Expr::List(items) => items.iter().map(const_value).collect::<Option<Vec<_>>>().map(Value::Array),
        Expr::Map(entries) => entries
            .iter()
            .map(|(k, v)| const_value(v).map(|v| (k.clone(), v)))
            .collect::<Option<Map<String, Value>>>()
            .map(Value::Object),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::lexer::tokenize;

    fn parse_source(source: &str) -> (Program, Vec<String>) {
        let mut diagnostics = Vec::new();
        let tokens = tokenize(source, &mut diagnostics);
        let program = parse(tokens, &mut diagnostics);
        (program, diagnostics.iter().map(ToString::to_string).collect())
    }

    #[test]
    fn operator_precedence() {
        let (program, diags) = parse_source("return 1 + 2 * 3 == 7 and not false;");
        assert!(diags.is_empty(), "{diags:?}");
        let Program::Body(stmts) = program else {
            panic!("expected body");
        };
        let Stmt::Return(Some(Expr::Binary(BinOp::And, left, right, _)), _) = &stmts[0] else {
            panic!("unexpected tree: {stmts:?}");
        };
        assert!(matches!(left.as_ref(), Expr::Binary(BinOp::Eq, _, _, _)));
        assert!(matches!(right.as_ref(), Expr::Unary(UnaryOp::Not, _, _)));
    }

    #[test]
    fn assignment_paths_are_collected() {
        let (program, diags) = parse_source("p.pos[0] = 1;");
        assert!(diags.is_empty(), "{diags:?}");
        let Program::Body(stmts) = program else {
            panic!("expected body");
        };
        assert_eq!(
            stmts[0],
            Stmt::Assign {
                root: "p".into(),
                path: vec![
                    PathSegment::Key("pos".into()),
                    PathSegment::Index(Expr::Number(0.0))
                ],
                value: Expr::Number(1.0),
                pos: Pos { line: 1, col: 1 },
            }
        );
    }

    #[test]
    fn recovers_and_reports_each_broken_statement() {
        let (_, diags) = parse_source("let = 1;\nlet y = ;\nlet z = 3;\n1 +;");
        assert_eq!(
            diags,
            vec![
                "line 1, col 5: expected variable name after `let`, found `=`",
                "line 2, col 9: expected expression, found `;`",
                "line 4, col 4: expected expression, found `;`",
            ]
        );
    }

    #[test]
    fn semicolon_is_optional_before_closing_brace() {
        let (_, diags) = parse_source("if true { return 1 }");
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn parses_complete_tool_definition() {
        let source = r#"
            tool spawn {
                description "Spawn objects";
                permission read, write;
                param kind: enum(Cube, Sphere);
                param count: integer = 3;
                param label?: string;
                depends time;
                run { return count; }
            }
        "#;
        let (program, diags) = parse_source(source);
        assert!(diags.is_empty(), "{diags:?}");
        let Program::Tool(def) = program else {
            panic!("expected tool");
        };
        assert_eq!(def.name, "spawn");
        assert_eq!(def.description.as_deref(), Some("Spawn objects"));
        assert_eq!(def.permissions, Permissions::READ | Permissions::WRITE);
        assert_eq!(def.params.len(), 3);
        assert!(def.params[0].required);
        assert_eq!(def.params[1].default, Some(serde_json::json!(3)));
        assert!(!def.params[1].required);
        assert!(!def.params[2].required);
        assert_eq!(def.depends, vec!["time"]);
        assert_eq!(def.body.len(), 1);
    }

    #[test]
    fn tool_definition_errors_are_reported() {
        let (_, diags) = parse_source("tool t { permission admin; param x: widget; }");
        assert_eq!(
            diags,
            vec![
                "line 1, col 21: unknown permission `admin` (expected read, write, delete or none)",
                "line 1, col 37: unknown parameter type `widget`",
                "line 1, col 6: tool `t` has no `run` block",
            ]
        );
    }

    #[test]
    fn nested_tool_definition_is_rejected() {
        let (_, diags) = parse_source("let a = 1;\ntool x { run { } }");
        assert_eq!(
            diags[0],
            "line 2, col 1: tool definitions are only allowed at the top level"
        );
    }

    #[test]
    fn literal_defaults_fold_to_json() {
        let (program, diags) = parse_source("tool t { param v: vec3 = [1, -2, 0.5]; run {} }");
        assert!(diags.is_empty(), "{diags:?}");
        let Program::Tool(def) = program else {
            panic!("expected tool");
        };
        assert_eq!(def.params[0].default, Some(serde_json::json!([1, -2, 0.5])));
    }
}
