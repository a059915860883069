//! Tokenizer shared by the filter and order-by grammars.

use crate::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Bare word: a keyword or a dotted field path.
    Word(String),
    /// Backquoted field path; never a keyword.
    Path(String),
    Str(String),
    Num(f64),
    Op(CmpOp),
    LParen,
    RParen,
    Comma,
}

impl Token {
    pub fn is_keyword(&self, kw: &str) -> bool { matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(kw)) }

    pub fn describe(&self) -> String {
        match self {
            Token::Word(w) => format!("'{}'", w),
            Token::Path(p) => format!("`{}`", p),
            Token::Str(s) => format!("string {:?}", s),
            Token::Num(n) => format!("number {}", n),
            Token::Op(op) => format!("'{}'", op),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::Comma => "','".into(),
        }
    }
}

fn word_char(c: char) -> bool { c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '[' | ']' | '$') }

/// Split `text` into tokens paired with their byte offsets.
pub fn tokenize(text: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let mut out = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => { chars.next(); }
            '(' => { chars.next(); out.push((Token::LParen, pos)); }
            ')' => { chars.next(); out.push((Token::RParen, pos)); }
            ',' => { chars.next(); out.push((Token::Comma, pos)); }
            '=' | '!' | '<' | '>' => {
                chars.next();
                let next = chars.peek().map(|&(_, n)| n);
                let (op, two) = match (c, next) {
                    ('=', Some('=')) => (CmpOp::Eq, true),
                    ('=', _) => (CmpOp::Eq, false),
                    ('!', Some('=')) => (CmpOp::Ne, true),
                    ('<', Some('=')) => (CmpOp::Le, true),
                    ('<', Some('>')) => (CmpOp::Ne, true),
                    ('<', _) => (CmpOp::Lt, false),
                    ('>', Some('=')) => (CmpOp::Ge, true),
                    ('>', _) => (CmpOp::Gt, false),
                    _ => return Err(ParseError::new(pos, "expected '!='")),
                };
                if two { chars.next(); }
                out.push((Token::Op(op), pos));
            }
            '\'' | '"' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some((_, 'n')) => s.push('\n'),
                            Some((_, 't')) => s.push('\t'),
                            Some((_, e)) => s.push(e),
                            None => break,
                        },
                        ch if ch == c => { closed = true; break; }
                        ch => s.push(ch),
                    }
                }
                if !closed { return Err(ParseError::new(pos, "unterminated string literal")); }
                out.push((Token::Str(s), pos));
            }
            '`' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                for (_, ch) in chars.by_ref() {
                    if ch == '`' { closed = true; break; }
                    s.push(ch);
                }
                if !closed { return Err(ParseError::new(pos, "unterminated backquoted path")); }
                out.push((Token::Path(s), pos));
            }
            c if c.is_ascii_digit() || (c == '-' && text[pos + 1..].starts_with(|d: char| d.is_ascii_digit())) => {
                let mut end = pos + c.len_utf8();
                chars.next();
                while let Some(&(i, d)) = chars.peek() {
                    let exp_sign = matches!(d, '+' | '-') && matches!(text[..i].chars().last(), Some('e' | 'E'));
                    if d.is_ascii_digit() || matches!(d, '.' | 'e' | 'E') || exp_sign {
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let lit = &text[pos..end];
                let n = lit.parse::<f64>().map_err(|_| ParseError::new(pos, format!("invalid number {:?}", lit)))?;
                out.push((Token::Num(n), pos));
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let mut end = pos;
                while let Some(&(i, d)) = chars.peek() {
                    if !word_char(d) { break; }
                    end = i + d.len_utf8();
                    chars.next();
                }
                out.push((Token::Word(text[pos..end].to_string()), pos));
            }
            other => return Err(ParseError::new(pos, format!("unexpected character {:?}", other))),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<Token> { tokenize(s).unwrap().into_iter().map(|(t, _)| t).collect() }

    #[test]
    fn operators_and_literals() {
        assert_eq!(
            toks("a.b==\"x\" and c<>-1.5e3 or `$.d` >= 'y\\'z'"),
            vec![
                Token::Word("a.b".into()),
                Token::Op(CmpOp::Eq),
                Token::Str("x".into()),
                Token::Word("and".into()),
                Token::Word("c".into()),
                Token::Op(CmpOp::Ne),
                Token::Num(-1500.0),
                Token::Word("or".into()),
                Token::Path("$.d".into()),
                Token::Op(CmpOp::Ge),
                Token::Str("y'z".into()),
            ]
        );
    }

    #[test]
    fn positions_point_at_token_start() {
        let t = tokenize("  name = 1").unwrap();
        assert_eq!(t.iter().map(|(_, p)| *p).collect::<Vec<_>>(), vec![2, 7, 9]);
    }

    #[test]
    fn errors_carry_position() {
        assert_eq!(tokenize("a = 'open").unwrap_err().pos, 4);
        assert_eq!(tokenize("a ! b").unwrap_err().pos, 2);
        assert_eq!(tokenize("a = #").unwrap_err().pos, 4);
    }
}
