//! Multi-key order-by expressions: `field [asc|desc] (, field [asc|desc])*`.

use std::cmp::Ordering;

use smallvec::SmallVec;
use vista_core::{FieldAccess, FieldPath, FieldValue};

use crate::filter::field_path;
use crate::lexer::{tokenize, Token};
use crate::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub path: FieldPath,
    pub direction: Direction,
}

/// Parsed order-by list, highest priority first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderExpr {
    keys: SmallVec<[OrderKey; 4]>,
}

impl OrderExpr {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() { return Err(ParseError::new(0, "empty order expression")); }
        let mut keys: SmallVec<[OrderKey; 4]> = SmallVec::new();
        let mut it = tokens.into_iter().peekable();
        loop {
            let (tok, pos) = it.next().ok_or_else(|| ParseError::new(text.len(), "expected field path after ','"))?;
            let path = field_path(&tok, pos)?;
            let mut direction = Direction::Asc;
            if let Some((t, _)) = it.peek() {
                if t.is_keyword("asc") {
                    it.next();
                } else if t.is_keyword("desc") {
                    direction = Direction::Desc;
                    it.next();
                }
            }
            keys.push(OrderKey { path, direction });
            match it.next() {
                None => break,
                Some((Token::Comma, _)) => continue,
                Some((other, p)) => return Err(ParseError::new(p, format!("expected ',' or end of input, found {}", other.describe()))),
            }
        }
        Ok(Self { keys })
    }

    pub fn keys(&self) -> &[OrderKey] { &self.keys }

    /// Compare by each key in turn; later keys only break ties of earlier ones.
    pub fn compare<T: FieldAccess + ?Sized>(&self, a: &T, b: &T) -> Ordering {
        for key in self.keys.iter() {
            let ord = compare_fields(a.field(&key.path), b.field(&key.path));
            let ord = match key.direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal { return ord; }
        }
        Ordering::Equal
    }

    /// Stable in-place sort; fully tied items keep their input order.
    pub fn sort<T: FieldAccess>(&self, items: &mut [T]) { items.sort_by(|a, b| self.compare(a, b)); }
}

fn type_rank(v: &FieldValue<'_>) -> u8 {
    match v {
        FieldValue::Bool(_) => 0,
        FieldValue::Num(_) => 1,
        FieldValue::Str(_) => 2,
    }
}

/// Natural ordering per type; absent sorts first, mixed types by type rank.
pub fn compare_fields(a: Option<FieldValue<'_>>, b: Option<FieldValue<'_>>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => match (x, y) {
            (FieldValue::Str(l), FieldValue::Str(r)) => l.cmp(r),
            (FieldValue::Num(l), FieldValue::Num(r)) => l.total_cmp(&r),
            (FieldValue::Bool(l), FieldValue::Bool(r)) => l.cmp(&r),
            (x, y) => type_rank(&x).cmp(&type_rank(&y)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn names(items: &[Value]) -> Vec<&str> { items.iter().map(|v| v["name"].as_str().unwrap_or("")).collect() }

    #[test]
    fn parses_directions_and_defaults() {
        let o = OrderExpr::parse("metadata.name, status.phase DESC, spec.plan asc").unwrap();
        let dirs: Vec<_> = o.keys().iter().map(|k| k.direction).collect();
        assert_eq!(dirs, vec![Direction::Asc, Direction::Desc, Direction::Asc]);
        assert_eq!(o.keys()[1].path.as_str(), "status.phase");
    }

    #[test]
    fn parse_errors() {
        assert_eq!(OrderExpr::parse("").unwrap_err().pos, 0);
        assert_eq!(OrderExpr::parse("a,").unwrap_err().pos, 2);
        assert_eq!(OrderExpr::parse("a desc b").unwrap_err().pos, 7);
        assert_eq!(OrderExpr::parse("a == 1").unwrap_err().pos, 2);
        assert_eq!(OrderExpr::parse("'a'").unwrap_err().pos, 0);
    }

    #[test]
    fn single_key_ascending() {
        let mut items = vec![json!({ "name": "b" }), json!({ "name": "a" }), json!({ "name": "c" })];
        OrderExpr::parse("name asc").unwrap().sort(&mut items);
        assert_eq!(names(&items), vec!["a", "b", "c"]);
        OrderExpr::parse("name desc").unwrap().sort(&mut items);
        assert_eq!(names(&items), vec!["c", "b", "a"]);
    }

    #[test]
    fn ties_keep_input_order_and_fall_through_keys() {
        let mut items = vec![
            json!({ "name": "x1", "rank": 2, "tier": "b" }),
            json!({ "name": "x2", "rank": 1, "tier": "a" }),
            json!({ "name": "x3", "rank": 2, "tier": "a" }),
            json!({ "name": "x4", "rank": 1, "tier": "a" }),
            json!({ "name": "x5", "rank": 2, "tier": "b" }),
        ];
        let mut by_rank = items.clone();
        OrderExpr::parse("rank").unwrap().sort(&mut by_rank);
        assert_eq!(names(&by_rank), vec!["x2", "x4", "x1", "x3", "x5"]);

        OrderExpr::parse("rank desc, tier").unwrap().sort(&mut items);
        assert_eq!(names(&items), vec!["x3", "x1", "x5", "x2", "x4"]);
    }

    #[test]
    fn numbers_sort_numerically_and_missing_first() {
        let mut items = vec![
            json!({ "name": "ten", "n": 10 }),
            json!({ "name": "none" }),
            json!({ "name": "nine", "n": 9 }),
            json!({ "name": "null", "n": null }),
        ];
        OrderExpr::parse("n").unwrap().sort(&mut items);
        assert_eq!(names(&items), vec!["none", "null", "nine", "ten"]);
    }

    #[test]
    fn booleans_and_mixed_types() {
        assert_eq!(compare_fields(Some(FieldValue::Bool(false)), Some(FieldValue::Bool(true))), Ordering::Less);
        assert_eq!(compare_fields(Some(FieldValue::Num(100.0)), Some(FieldValue::Str("1"))), Ordering::Less);
        assert_eq!(compare_fields(Some(FieldValue::Bool(true)), Some(FieldValue::Num(0.0))), Ordering::Less);
        assert_eq!(compare_fields(None, Some(FieldValue::Bool(false))), Ordering::Less);
    }
}
