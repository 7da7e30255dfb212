//! Small arithmetic/logical/comparison expression language used by field
//! conditionals and union `when` clauses: component C.
//!
//! Grammar and precedence follow §4.C; evaluation returns a
//! two-constructor result (value | error), and conditionals are the single
//! documented site that coerces an `Err` into `false`.

use std::fmt;

use crate::context::Context;
use crate::error::{BinSchemaError, Result};
use crate::value::Value;

/// A parsed expression, ready to be evaluated against a [`Context`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntLit(i128),
    StrLit(String),
    Ident(String),
    /// A dotted or bracketed path into sibling/parent/array state, e.g.
    /// `flags.enabled` or `items[same_index<Chunk>]`.
    Path(Vec<String>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    BitNot,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// The result of evaluating an [`Expr`]: the arbitrary-precision integer
/// domain promised by §4.C, plus strings and booleans for comparisons.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Int(i128),
    Str(String),
    Bool(bool),
}

impl ExprValue {
    /// bigint zero, the empty string and `false` are falsy; everything
    /// else is truthy.
    pub fn truthy(&self) -> bool {
        match self {
            ExprValue::Int(v) => *v != 0,
            ExprValue::Str(s) => !s.is_empty(),
            ExprValue::Bool(b) => *b,
        }
    }

    fn as_int(&self) -> Result<i128> {
        match self {
            ExprValue::Int(v) => Ok(*v),
            ExprValue::Bool(b) => Ok(if *b { 1 } else { 0 }),
            ExprValue::Str(_) => Err(BinSchemaError::encoding(
                "cannot use a string value in numeric context",
            )),
        }
    }
}

impl fmt::Display for ExprValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprValue::Int(v) => write!(f, "{v}"),
            ExprValue::Str(s) => write!(f, "{s}"),
            ExprValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Parses an expression from source text. Syntax errors are reported with
/// `SchemaInvalid`-shaped messages since they are caught by the validator
/// (§4.F "Conditional expressions and `when` clauses must parse").
pub fn parse(src: &str) -> Result<Expr> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(BinSchemaError::encoding(format!(
            "unexpected trailing input in expression `{src}`"
        )));
    }
    Ok(expr)
}

/// Evaluates `expr` against `ctx`. Identifier/path lookup consults the
/// current value first, then surrounding parents from innermost outward
/// (§4.C "Lookup").
pub fn eval(expr: &Expr, ctx: &Context) -> Result<ExprValue> {
    match expr {
        Expr::IntLit(v) => Ok(ExprValue::Int(*v)),
        Expr::StrLit(s) => Ok(ExprValue::Str(s.clone())),
        Expr::Ident(name) => lookup_scalar(ctx, std::slice::from_ref(name)),
        Expr::Path(segments) => lookup_scalar(ctx, segments),
        Expr::Unary(op, inner) => {
            let v = eval(inner, ctx)?;
            match op {
                UnOp::Not => Ok(ExprValue::Bool(!v.truthy())),
                UnOp::BitNot => Ok(ExprValue::Int(!v.as_int()?)),
                UnOp::Neg => Ok(ExprValue::Int(-v.as_int()?)),
            }
        }
        Expr::Binary(BinOp::And, lhs, rhs) => {
            let l = eval(lhs, ctx)?;
            if !l.truthy() {
                return Ok(ExprValue::Bool(false));
            }
            Ok(ExprValue::Bool(eval(rhs, ctx)?.truthy()))
        }
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            let l = eval(lhs, ctx)?;
            if l.truthy() {
                return Ok(ExprValue::Bool(true));
            }
            Ok(ExprValue::Bool(eval(rhs, ctx)?.truthy()))
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, eval(lhs, ctx)?, eval(rhs, ctx)?),
    }
}

/// Evaluates a conditional expression, coercing any evaluation error to
/// `false` — the single documented soft-failure site of §4.C.
pub fn eval_conditional(expr: &Expr, ctx: &Context) -> bool {
    eval(expr, ctx).map(|v| v.truthy()).unwrap_or(false)
}

/// Evaluates a union `when` clause, binding the synthetic identifier
/// `value` to the peeked/field-supplied discriminator.
pub fn eval_when(expr: &Expr, discriminator: &ExprValue, ctx: &Context) -> Result<bool> {
    let bound = bind_value(expr, discriminator);
    eval(&bound, ctx).map(|v| v.truthy())
}

/// Substitutes the identifier `value` with a literal before evaluation —
/// used only for `when` clauses, which bind a synthetic identifier that
/// does not live in any real context.
fn bind_value(expr: &Expr, discriminator: &ExprValue) -> Expr {
    match expr {
        Expr::Ident(name) if name == "value" => literal_of(discriminator),
        Expr::Path(segments) if segments.first().map(String::as_str) == Some("value") => {
            literal_of(discriminator)
        }
        Expr::Unary(op, inner) => Expr::Unary(*op, Box::new(bind_value(inner, discriminator))),
        Expr::Binary(op, lhs, rhs) => Expr::Binary(
            *op,
            Box::new(bind_value(lhs, discriminator)),
            Box::new(bind_value(rhs, discriminator)),
        ),
        other => other.clone(),
    }
}

fn literal_of(v: &ExprValue) -> Expr {
    match v {
        ExprValue::Int(i) => Expr::IntLit(*i),
        ExprValue::Str(s) => Expr::StrLit(s.clone()),
        ExprValue::Bool(b) => Expr::IntLit(if *b { 1 } else { 0 }),
    }
}

fn eval_binary(op: BinOp, l: ExprValue, r: ExprValue) -> Result<ExprValue> {
    use BinOp::*;
    match op {
        Eq | Ne => {
            let equal = match (&l, &r) {
                (ExprValue::Str(a), ExprValue::Str(b)) => a == b,
                (ExprValue::Str(_), _) | (_, ExprValue::Str(_)) => {
                    return Err(BinSchemaError::encoding(
                        "cannot compare string and numeric values",
                    ));
                }
                _ => l.as_int()? == r.as_int()?,
            };
            Ok(ExprValue::Bool(if op == Eq { equal } else { !equal }))
        }
        Lt | Le | Gt | Ge => {
            let (a, b) = (l.as_int()?, r.as_int()?);
            let result = match op {
                Lt => a < b,
                Le => a <= b,
                Gt => a > b,
                Ge => a >= b,
                _ => unreachable!(),
            };
            Ok(ExprValue::Bool(result))
        }
        BitAnd => Ok(ExprValue::Int(l.as_int()? & r.as_int()?)),
        BitOr => Ok(ExprValue::Int(l.as_int()? | r.as_int()?)),
        BitXor => Ok(ExprValue::Int(l.as_int()? ^ r.as_int()?)),
        Shl => Ok(ExprValue::Int(l.as_int()? << r.as_int()?)),
        Shr => Ok(ExprValue::Int(l.as_int()? >> r.as_int()?)),
        Add => Ok(ExprValue::Int(l.as_int()? + r.as_int()?)),
        Sub => Ok(ExprValue::Int(l.as_int()? - r.as_int()?)),
        Mul => Ok(ExprValue::Int(l.as_int()? * r.as_int()?)),
        Div => {
            let b = r.as_int()?;
            if b == 0 {
                return Err(BinSchemaError::encoding("division by zero"));
            }
            Ok(ExprValue::Int(l.as_int()? / b))
        }
        Rem => {
            let b = r.as_int()?;
            if b == 0 {
                return Err(BinSchemaError::encoding("modulo by zero"));
            }
            Ok(ExprValue::Int(l.as_int()? % b))
        }
        And | Or => unreachable!("short-circuited above"),
    }
}

fn lookup_scalar(ctx: &Context, segments: &[String]) -> Result<ExprValue> {
    let value = ctx.resolve_conditional(segments)?;
    value_to_expr(&value)
}

fn value_to_expr(value: &Value) -> Result<ExprValue> {
    match value {
        Value::UInt(v) => Ok(ExprValue::Int(*v as i128)),
        Value::Int(v) => Ok(ExprValue::Int(*v as i128)),
        Value::BigUInt(v) => Ok(ExprValue::Int(*v as i128)),
        Value::BigInt(v) => Ok(ExprValue::Int(*v)),
        Value::Str(s) => Ok(ExprValue::Str(s.clone())),
        Value::Bytes(_) | Value::Float32(_) | Value::Float64(_) => Err(BinSchemaError::encoding(
            "value cannot be used in an expression",
        )),
        other => Err(BinSchemaError::encoding(format!(
            "composite value {other:?} cannot be used in an expression"
        ))),
    }
}

// --- tokenizer -------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i128),
    Str(String),
    Ident(String),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Op(&'static str),
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut tokens = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '\'' {
            let mut s = String::new();
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                s.push(chars[i]);
                i += 1;
            }
            if i >= chars.len() {
                return Err(BinSchemaError::encoding("unterminated string literal"));
            }
            i += 1;
            tokens.push(Token::Str(s));
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            if c == '0' && chars.get(i + 1).copied() == Some('x') {
                i += 2;
                while i < chars.len() && chars[i].is_ascii_hexdigit() {
                    i += 1;
                }
                let hex: String = chars[start + 2..i].iter().collect();
                let v = i128::from_str_radix(&hex, 16)
                    .map_err(|e| BinSchemaError::encoding(format!("bad hex literal: {e}")))?;
                tokens.push(Token::Int(v));
                continue;
            }
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let dec: String = chars[start..i].iter().collect();
            let v = dec
                .parse::<i128>()
                .map_err(|e| BinSchemaError::encoding(format!("bad integer literal: {e}")))?;
            tokens.push(Token::Int(v));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        match c {
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            _ => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let op = match two.as_str() {
                    "&&" | "||" | "==" | "!=" | "<=" | ">=" | "<<" | ">>" => {
                        i += 2;
                        static_op(&two)
                    }
                    _ => {
                        let one = c.to_string();
                        i += 1;
                        static_op(&one)
                    }
                };
                let op = op.ok_or_else(|| {
                    BinSchemaError::encoding(format!("unexpected character `{c}` in expression"))
                })?;
                tokens.push(Token::Op(op));
            }
        }
    }

    Ok(tokens)
}

fn static_op(s: &str) -> Option<&'static str> {
    Some(match s {
        "&&" => "&&",
        "||" => "||",
        "==" => "==",
        "!=" => "!=",
        "<=" => "<=",
        ">=" => ">=",
        "<<" => "<<",
        ">>" => ">>",
        "&" => "&",
        "|" => "|",
        "^" => "^",
        "~" => "~",
        "<" => "<",
        ">" => ">",
        "+" => "+",
        "-" => "-",
        "*" => "*",
        "/" => "/",
        "%" => "%",
        "!" => "!",
        _ => return None,
    })
}

// --- Pratt-ish recursive-descent parser, precedence follows C -------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat_op("||") {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_bitor()?;
        while self.eat_op("&&") {
            let rhs = self.parse_bitor()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bitor(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_bitxor()?;
        while self.eat_op("|") {
            let rhs = self.parse_bitxor()?;
            lhs = Expr::Binary(BinOp::BitOr, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bitxor(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_bitand()?;
        while self.eat_op("^") {
            let rhs = self.parse_bitand()?;
            lhs = Expr::Binary(BinOp::BitXor, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bitand(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.eat_op("&") {
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinOp::BitAnd, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_relational()?;
        loop {
            if self.eat_op("==") {
                let rhs = self.parse_relational()?;
                lhs = Expr::Binary(BinOp::Eq, Box::new(lhs), Box::new(rhs));
            } else if self.eat_op("!=") {
                let rhs = self.parse_relational()?;
                lhs = Expr::Binary(BinOp::Ne, Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_shift()?;
        loop {
            let op = if self.eat_op("<=") {
                BinOp::Le
            } else if self.eat_op(">=") {
                BinOp::Ge
            } else if self.eat_op("<") {
                BinOp::Lt
            } else if self.eat_op(">") {
                BinOp::Gt
            } else {
                break;
            };
            let rhs = self.parse_shift()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = if self.eat_op("<<") {
                BinOp::Shl
            } else if self.eat_op(">>") {
                BinOp::Shr
            } else {
                break;
            };
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                break;
            };
            let rhs = self.parse_mul()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("%") {
                BinOp::Rem
            } else {
                break;
            };
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat_op("!") {
            return Ok(Expr::Unary(UnOp::Not, Box::new(self.parse_unary()?)));
        }
        if self.eat_op("~") {
            return Ok(Expr::Unary(UnOp::BitNot, Box::new(self.parse_unary()?)));
        }
        if self.eat_op("-") {
            return Ok(Expr::Unary(UnOp::Neg, Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Token::Int(v)) => Ok(Expr::IntLit(v)),
            Some(Token::Str(s)) => Ok(Expr::StrLit(s)),
            Some(Token::Ident(name)) => self.parse_ident_or_path(name),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                if !matches!(self.bump(), Some(Token::RParen)) {
                    return Err(BinSchemaError::encoding("expected closing `)`"));
                }
                Ok(inner)
            }
            other => Err(BinSchemaError::encoding(format!(
                "unexpected token in expression: {other:?}"
            ))),
        }
    }

    /// Parses `name`, `name.field.field`, or `name[selector]` (the
    /// selector's own `<T>` generic-looking syntax is swallowed into a
    /// single path segment verbatim; `Context::resolve_conditional` parses
    /// it further).
    fn parse_ident_or_path(&mut self, first: String) -> Result<Expr> {
        let mut segments = vec![first];
        loop {
            if matches!(self.peek(), Some(Token::Dot)) {
                self.pos += 1;
                match self.bump() {
                    Some(Token::Ident(name)) => segments.push(name),
                    other => {
                        return Err(BinSchemaError::encoding(format!(
                            "expected identifier after `.`, found {other:?}"
                        )));
                    }
                }
            } else if matches!(self.peek(), Some(Token::LBracket)) {
                self.pos += 1;
                let mut inner = String::from("[");
                // Selectors look like `same_index<Type>`; `<`/`>` never
                // appear as real operators inside `[...]`, so we scan raw
                // tokens back into text.
                while !matches!(self.peek(), Some(Token::RBracket) | None) {
                    match self.bump() {
                        Some(Token::Ident(s)) => inner.push_str(&s),
                        Some(Token::Op(o)) => inner.push_str(o),
                        Some(Token::Int(v)) => inner.push_str(&v.to_string()),
                        _ => {
                            return Err(BinSchemaError::encoding("malformed selector"));
                        }
                    }
                }
                if !matches!(self.bump(), Some(Token::RBracket)) {
                    return Err(BinSchemaError::encoding("expected closing `]`"));
                }
                inner.push(']');
                let last = segments.pop().unwrap();
                segments.push(format!("{last}{inner}"));
            } else {
                break;
            }
        }
        if segments.len() == 1 {
            Ok(Expr::Ident(segments.into_iter().next().unwrap()))
        } else {
            Ok(Expr::Path(segments))
        }
    }
}
