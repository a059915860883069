//! Vista filter: textual filter and order-by expressions evaluated through
//! [`vista_core::FieldAccess`], so any object kind can be queried.

#![forbid(unsafe_code)]

mod filter;
mod lexer;
mod order;

pub use filter::{FilterExpr, Literal};
pub use lexer::CmpOp;
pub use order::{compare_fields, Direction, OrderExpr, OrderKey};

use vista_core::FieldAccess;

/// Malformed filter or order text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parse error at {pos}: {reason}")]
pub struct ParseError {
    /// Byte offset into the expression text.
    pub pos: usize,
    pub reason: String,
}

impl ParseError {
    pub fn new(pos: usize, reason: impl Into<String>) -> Self { Self { pos, reason: reason.into() } }
}

/// Object data that does not fit the expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("type mismatch on {path}: cannot apply '{op}' to {field_type} field and {literal_type} literal")]
    TypeMismatch {
        path: String,
        op: &'static str,
        field_type: &'static str,
        literal_type: &'static str,
    },
}

/// Parse optional filter text; absent or blank text means "match everything".
pub fn parse_filter(text: Option<&str>) -> Result<Option<FilterExpr>, ParseError> {
    match text {
        Some(t) if !t.trim().is_empty() => FilterExpr::parse(t).map(Some),
        _ => Ok(None),
    }
}

/// Parse optional order-by text; absent or blank text means "keep input order".
pub fn parse_order(text: Option<&str>) -> Result<Option<OrderExpr>, ParseError> {
    match text {
        Some(t) if !t.trim().is_empty() => OrderExpr::parse(t).map(Some),
        _ => Ok(None),
    }
}

/// Keep the items matching `expr`, preserving order. The first evaluation error aborts.
pub fn retain_matching<T: FieldAccess>(items: Vec<T>, expr: Option<&FilterExpr>) -> Result<Vec<T>, EvalError> {
    let Some(expr) = expr else { return Ok(items) };
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        if expr.evaluate(&it)? { out.push(it); }
    }
    Ok(out)
}
