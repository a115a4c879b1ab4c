//! Dynamic path/selector expressions over [`Term`] values.
//!
//! The surface syntax:
//!
//! ```text
//! %                      context scope
//! $                      global scope
//! %.name  %.0  %[key]    child selection
//! %.*     %.**           children / descendants
//! %::name                member selection
//! %[? predicate]         filter
//! min(%.a, %.b)          invoke
//! cond ? then : else     conditional
//! "rate: {%.rate}/s"     format template with embedded expressions
//! ```
//!
//! plus the usual unary (`- + ! ~`), arithmetic, comparison, bitwise and
//! short-circuit logical operators. Parsing is incremental: see
//! [`parser::ExprParser`]; rendering is resumable: see [`writer::ExprWriter`].

pub mod eval;
pub mod lexer;
pub mod parser;
pub mod stream;
pub mod writer;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::term::Term;

pub use eval::{Evaluator, InvokeScope, TermFn};
pub use parser::{parse_expr, ExprParser, ParseStep};
pub use stream::{BoxStream, OnceStream, TermStream};
pub use writer::{render, ExprWriter, WriteStep};

/// An expression tree node. Subtrees are committed on construction and
/// structurally shared through [`Arc`]; nothing here is mutated after it is
/// linked into a parent.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Term),
    /// The context scope `%`.
    ContextScope,
    /// The global scope `$`.
    GlobalScope,
    Unary(UnaryOp, Arc<Expr>),
    Binary(BinaryOp, Arc<Expr>, Arc<Expr>),
    /// `cond ? then : else`.
    Cond(Arc<Expr>, Arc<Expr>, Arc<Expr>),
    /// `scope.key` / `scope[key]`.
    Child(Arc<Expr>, Arc<Expr>),
    /// `scope.*`
    Children(Arc<Expr>),
    /// `scope.**`
    Descendants(Arc<Expr>),
    /// `scope::name`
    Member(Arc<Expr>, String),
    /// `scope[? predicate]`
    Filter(Arc<Expr>, Arc<Expr>),
    /// `func(args...)`
    Invoke(Arc<Expr>, Vec<Arc<Expr>>),
    /// A format template: literal text interleaved with embedded expressions.
    Format(Vec<FormatPart>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormatPart {
    Text(String),
    Embed(Arc<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `+`
    Pos,
    /// `!`
    Not,
    /// `~`
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    BitOr,
    BitXor,
    BitAnd,
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn token(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::BitAnd => "&",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Ge => ">=",
            BinaryOp::Gt => ">",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }

    pub fn precedence(&self) -> u8 {
        match self {
            // comparisons deliberately sit below everything so that nesting
            // one inside any other operator always parenthesizes
            BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Ge
            | BinaryOp::Gt => 0,
            BinaryOp::Or => 3,
            BinaryOp::And => 4,
            BinaryOp::BitOr => 5,
            BinaryOp::BitXor => 6,
            BinaryOp::BitAnd => 7,
            BinaryOp::Add | BinaryOp::Sub => 8,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 9,
        }
    }
}

impl UnaryOp {
    pub fn token(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }
}

impl Expr {
    /// The fixed per-variant precedence used by both the parser (descent
    /// order) and the writer (parenthesization).
    pub fn precedence(&self) -> u8 {
        match self {
            Expr::Binary(op, _, _) => op.precedence(),
            Expr::Cond(_, _, _) => 2,
            Expr::Unary(_, _) => 10,
            Expr::Child(_, _)
            | Expr::Children(_)
            | Expr::Descendants(_)
            | Expr::Member(_, _)
            | Expr::Filter(_, _)
            | Expr::Invoke(_, _) => 11,
            Expr::Literal(_) | Expr::ContextScope | Expr::GlobalScope | Expr::Format(_) => 12,
        }
    }

    pub fn is_selector(&self) -> bool {
        matches!(
            self,
            Expr::Child(_, _)
                | Expr::Children(_)
                | Expr::Descendants(_)
                | Expr::Member(_, _)
                | Expr::Filter(_, _)
        )
    }
}

/// A positioned expression error: syntax, overflow, or exhausted input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} at offset {at}")]
pub struct ExprError {
    pub kind: ExprErrorKind,
    pub at: usize,
}

impl ExprError {
    pub fn new(kind: ExprErrorKind, at: usize) -> Self {
        ExprError { kind, at }
    }

    pub fn is_unexpected_end(&self) -> bool {
        matches!(self.kind, ExprErrorKind::UnexpectedEnd)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprErrorKind {
    UnexpectedChar(char),
    UnterminatedText,
    BadEscape,
    NumberOverflow,
    UnexpectedToken(String),
    TrailingInput(String),
    UnexpectedEnd,
}

impl fmt::Display for ExprErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprErrorKind::UnexpectedChar(c) => write!(f, "unexpected character '{}'", c),
            ExprErrorKind::UnterminatedText => write!(f, "unterminated text literal"),
            ExprErrorKind::BadEscape => write!(f, "malformed escape sequence"),
            ExprErrorKind::NumberOverflow => write!(f, "numeric literal overflow"),
            ExprErrorKind::UnexpectedToken(token) => write!(f, "unexpected token '{}'", token),
            ExprErrorKind::TrailingInput(token) => {
                write!(f, "trailing input beginning with '{}'", token)
            }
            ExprErrorKind::UnexpectedEnd => write!(f, "unexpected end of input"),
        }
    }
}

/// True when `text` can be written as a bare field name (`.name` sugar).
pub(crate) fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
