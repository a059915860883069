//! Boolean filter expressions.
//!
//! ```text
//! expr    := and ( OR and )*
//! and     := unary ( AND unary )*
//! unary   := NOT unary | primary
//! primary := '(' expr ')' | TRUE | FALSE
//!          | field cmp literal | field [NOT] LIKE string | field IS [NOT] NULL
//! ```

use regex::Regex;
use vista_core::{FieldAccess, FieldPath, FieldValue};

use crate::lexer::{tokenize, CmpOp, Token};
use crate::{EvalError, ParseError};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Literal {
    fn as_value(&self) -> FieldValue<'_> {
        match self {
            Literal::Str(s) => FieldValue::Str(s),
            Literal::Num(n) => FieldValue::Num(*n),
            Literal::Bool(b) => FieldValue::Bool(*b),
        }
    }
}

/// Parsed filter. Immutable; evaluate it against as many objects as needed.
#[derive(Debug, Clone)]
pub enum FilterExpr {
    Const(bool),
    Compare { path: FieldPath, op: CmpOp, value: Literal },
    Like { path: FieldPath, pattern: String, regex: Regex, negated: bool },
    IsNull { path: FieldPath, negated: bool },
    Not(Box<FilterExpr>),
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
}

impl FilterExpr {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() { return Err(ParseError::new(0, "empty expression")); }
        let mut p = Parser { tokens, idx: 0, end: text.len() };
        let expr = p.or()?;
        if let Some((tok, pos)) = p.tokens.get(p.idx) {
            return Err(ParseError::new(*pos, format!("unexpected {} after expression", tok.describe())));
        }
        Ok(expr)
    }

    /// Does `obj` match? Missing fields make comparisons false; mismatched types are errors.
    pub fn evaluate<T: FieldAccess + ?Sized>(&self, obj: &T) -> Result<bool, EvalError> {
        match self {
            FilterExpr::Const(b) => Ok(*b),
            FilterExpr::Compare { path, op, value } => match obj.field(path) {
                None => Ok(false),
                Some(v) => compare(path, *op, v, value.as_value()),
            },
            FilterExpr::Like { path, regex, negated, .. } => match obj.field(path) {
                None => Ok(false),
                Some(FieldValue::Str(s)) => Ok(regex.is_match(s) != *negated),
                Some(v) => Err(EvalError::TypeMismatch {
                    path: path.to_string(),
                    op: if *negated { "not like" } else { "like" },
                    field_type: v.type_name(),
                    literal_type: "string",
                }),
            },
            FilterExpr::IsNull { path, negated } => Ok(obj.field(path).is_none() != *negated),
            FilterExpr::Not(inner) => Ok(!inner.evaluate(obj)?),
            FilterExpr::And(l, r) => Ok(l.evaluate(obj)? && r.evaluate(obj)?),
            FilterExpr::Or(l, r) => Ok(l.evaluate(obj)? || r.evaluate(obj)?),
        }
    }
}

fn compare(path: &FieldPath, op: CmpOp, field: FieldValue<'_>, lit: FieldValue<'_>) -> Result<bool, EvalError> {
    use std::cmp::Ordering;
    let mismatch = || EvalError::TypeMismatch {
        path: path.to_string(),
        op: op.as_str(),
        field_type: field.type_name(),
        literal_type: lit.type_name(),
    };
    let ord: Ordering = match (field, lit) {
        (FieldValue::Str(a), FieldValue::Str(b)) => a.cmp(b),
        // IEEE comparison: -0 equals 0
        (FieldValue::Num(a), FieldValue::Num(b)) => match a.partial_cmp(&b) {
            Some(ord) => ord,
            None => return Ok(matches!(op, CmpOp::Ne)),
        },
        (FieldValue::Bool(a), FieldValue::Bool(b)) => match op {
            CmpOp::Eq => return Ok(a == b),
            CmpOp::Ne => return Ok(a != b),
            _ => return Err(mismatch()),
        },
        _ => return Err(mismatch()),
    };
    Ok(match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
    })
}

/// Translate a SQL LIKE pattern (`%` any run, `_` one char) into an anchored regex.
fn like_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("(?s)^");
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    re.push('$');
    Regex::new(&re)
}

pub(crate) fn field_path(tok: &Token, pos: usize) -> Result<FieldPath, ParseError> {
    let raw = match tok {
        Token::Word(w) => w.as_str(),
        Token::Path(p) => p.as_str(),
        other => return Err(ParseError::new(pos, format!("expected field path, found {}", other.describe()))),
    };
    FieldPath::parse(raw).map_err(|e| ParseError::new(pos, e.to_string()))
}

const RESERVED: [&str; 6] = ["and", "or", "not", "like", "is", "null"];

struct Parser {
    tokens: Vec<(Token, usize)>,
    idx: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> { self.tokens.get(self.idx).map(|(t, _)| t) }

    fn pos(&self) -> usize { self.tokens.get(self.idx).map(|(_, p)| *p).unwrap_or(self.end) }

    fn next(&mut self) -> Result<(Token, usize), ParseError> {
        let t = self.tokens.get(self.idx).cloned().ok_or_else(|| ParseError::new(self.end, "unexpected end of input"))?;
        self.idx += 1;
        Ok(t)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.peek().map(|t| t.is_keyword(kw)).unwrap_or(false) {
            self.idx += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), ParseError> {
        let pos = self.pos();
        if self.eat_keyword(kw) { Ok(()) } else { Err(ParseError::new(pos, format!("expected '{}'", kw.to_ascii_uppercase()))) }
    }

    fn or(&mut self) -> Result<FilterExpr, ParseError> {
        let mut left = self.and()?;
        while self.eat_keyword("or") {
            let right = self.and()?;
            left = FilterExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<FilterExpr, ParseError> {
        let mut left = self.unary()?;
        while self.eat_keyword("and") {
            let right = self.unary()?;
            left = FilterExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<FilterExpr, ParseError> {
        if self.eat_keyword("not") {
            return Ok(FilterExpr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<FilterExpr, ParseError> {
        let (tok, pos) = self.next()?;
        match tok {
            Token::LParen => {
                let inner = self.or()?;
                match self.next()? {
                    (Token::RParen, _) => Ok(inner),
                    (other, p) => Err(ParseError::new(p, format!("expected ')', found {}", other.describe()))),
                }
            }
            t if t.is_keyword("true") => Ok(FilterExpr::Const(true)),
            t if t.is_keyword("false") => Ok(FilterExpr::Const(false)),
            Token::Word(ref w) if RESERVED.iter().any(|k| w.eq_ignore_ascii_case(k)) => {
                Err(ParseError::new(pos, format!("unexpected keyword '{}'", w)))
            }
            t @ (Token::Word(_) | Token::Path(_)) => {
                let path = field_path(&t, pos)?;
                self.predicate(path)
            }
            other => Err(ParseError::new(pos, format!("expected field path or '(', found {}", other.describe()))),
        }
    }

    fn predicate(&mut self, path: FieldPath) -> Result<FilterExpr, ParseError> {
        if self.eat_keyword("is") {
            let negated = self.eat_keyword("not");
            self.expect_keyword("null")?;
            return Ok(FilterExpr::IsNull { path, negated });
        }
        let negated = self.eat_keyword("not");
        if negated || self.peek().map(|t| t.is_keyword("like")).unwrap_or(false) {
            self.expect_keyword("like")?;
            let (tok, pos) = self.next()?;
            let pattern = match tok {
                Token::Str(p) => p,
                other => return Err(ParseError::new(pos, format!("LIKE expects a string pattern, found {}", other.describe()))),
            };
            let regex = like_regex(&pattern).map_err(|e| ParseError::new(pos, e.to_string()))?;
            return Ok(FilterExpr::Like { path, pattern, regex, negated });
        }
        let op = match self.next()? {
            (Token::Op(op), _) => op,
            (other, p) => return Err(ParseError::new(p, format!("expected comparison operator, found {}", other.describe()))),
        };
        let (tok, pos) = self.next()?;
        let value = match tok {
            Token::Str(s) => Literal::Str(s),
            Token::Num(n) => Literal::Num(n),
            t if t.is_keyword("true") => Literal::Bool(true),
            t if t.is_keyword("false") => Literal::Bool(false),
            other => return Err(ParseError::new(pos, format!("expected literal, found {}", other.describe()))),
        };
        Ok(FilterExpr::Compare { path, op, value })
    }
}
