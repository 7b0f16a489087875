//! Tokenizer for expression-bearing options.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use odata_edm::{Value, parse_duration};
use uuid::Uuid;

use crate::error::ParseError;

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    /// Plain or dotted identifier, keywords included (`and`, `Ns.Type`, `$it`).
    Ident(String),
    Literal(Value),
    EnumLiteral { type_name: String, member: String },
    OpenParen,
    CloseParen,
    Comma,
    Slash,
    Colon,
    Star,
    Minus,
    End,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

pub struct Lexer<'a> {
    option: &'a str,
    src: &'a str,
    pos: usize,
    /// Offset of `src` inside the full option value, for error positions.
    base: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl<'a> Lexer<'a> {
    pub fn new(option: &'a str, src: &'a str, base: usize) -> Self {
        Self {
            option,
            src,
            pos: 0,
            base,
        }
    }

    /// Tokenize the whole input, ending with [`TokenKind::End`].
    ///
    /// # Errors
    /// Returns [`ParseError`] for unterminated strings, malformed literals or
    /// characters outside the grammar.
    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut out = Vec::new();
        loop {
            let t = self.next_token()?;
            let end = t.kind == TokenKind::End;
            out.push(t);
            if end {
                return Ok(out);
            }
        }
    }

    fn error(&self, message: impl Into<String>, start: usize, end: usize) -> ParseError {
        let end = end.min(self.src.len()).max(start);
        ParseError::new(
            self.option,
            message,
            self.base + start,
            self.src.get(start..end).unwrap_or_default(),
        )
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn token(&self, kind: TokenKind, start: usize) -> Token {
        Token {
            kind,
            start: self.base + start,
            end: self.base + self.pos,
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += self.peek().map_or(1, char::len_utf8);
        }
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Ok(self.token(TokenKind::End, start));
        };

        let simple = match c {
            '(' => Some(TokenKind::OpenParen),
            ')' => Some(TokenKind::CloseParen),
            ',' => Some(TokenKind::Comma),
            '/' => Some(TokenKind::Slash),
            ':' => Some(TokenKind::Colon),
            '*' => Some(TokenKind::Star),
            _ => None,
        };
        if let Some(kind) = simple {
            self.pos += 1;
            return Ok(self.token(kind, start));
        }

        if c == '\'' {
            let s = self.string_body()?;
            return Ok(self.token(TokenKind::Literal(Value::String(s)), start));
        }
        if let Some(len) = guid_len(self.rest()) {
            let text = &self.rest()[..len];
            let g = Uuid::parse_str(text).map_err(|_| self.error("invalid GUID", start, start + len))?;
            self.pos += len;
            return Ok(self.token(TokenKind::Literal(Value::Guid(g)), start));
        }
        if c.is_ascii_digit() || (c == '-' && self.rest()[1..].starts_with(|d: char| d.is_ascii_digit())) {
            let v = self.number_or_temporal()?;
            return Ok(self.token(TokenKind::Literal(v), start));
        }
        if c == '-' {
            if self.rest()[1..].starts_with("INF") && !self.rest()[4..].starts_with(is_ident_char) {
                self.pos += 4;
                return Ok(self.token(TokenKind::Literal(Value::Double(f64::NEG_INFINITY)), start));
            }
            self.pos += 1;
            return Ok(self.token(TokenKind::Minus, start));
        }
        if is_ident_start(c) {
            return self.identifier(start);
        }
        Err(self.error(format!("unexpected character `{c}`"), start, start + c.len_utf8()))
    }

    /// Consume a quoted string starting at the current `'`, unescaping `''`.
    fn string_body(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("unterminated string literal", start, self.src.len()));
            };
            self.pos += c.len_utf8();
            if c == '\'' {
                if self.peek() == Some('\'') {
                    self.pos += 1;
                    out.push('\'');
                } else {
                    return Ok(out);
                }
            } else {
                out.push(c);
            }
        }
    }

    fn identifier(&mut self, start: usize) -> Result<Token, ParseError> {
        self.pos += 1;
        loop {
            while self.peek().is_some_and(is_ident_char) {
                self.pos += 1;
            }
            // Dotted continuation for qualified names.
            let rest = self.rest();
            if rest.starts_with('.') && rest[1..].starts_with(is_ident_start) {
                self.pos += 2;
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];

        if self.peek() == Some('\'') {
            let body = self.string_body()?;
            if text.eq_ignore_ascii_case("duration") {
                let d = parse_duration(&body)
                    .ok_or_else(|| self.error("invalid duration literal", start, self.pos))?;
                return Ok(self.token(TokenKind::Literal(Value::Duration(d)), start));
            }
            if text.contains('.') {
                return Ok(self.token(
                    TokenKind::EnumLiteral {
                        type_name: text.to_owned(),
                        member: body,
                    },
                    start,
                ));
            }
            return Err(self.error(format!("unknown literal prefix `{text}`"), start, self.pos));
        }

        let kind = match text {
            "true" => TokenKind::Literal(Value::Bool(true)),
            "false" => TokenKind::Literal(Value::Bool(false)),
            "null" => TokenKind::Literal(Value::Null),
            "INF" => TokenKind::Literal(Value::Double(f64::INFINITY)),
            "NaN" => TokenKind::Literal(Value::Double(f64::NAN)),
            _ => TokenKind::Ident(text.to_owned()),
        };
        Ok(self.token(kind, start))
    }

    fn number_or_temporal(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        let rest = self.rest();

        if let Some(len) = datetime_len(rest) {
            let text = &rest[..len];
            let v = parse_datetime(text).ok_or_else(|| self.error("invalid DateTimeOffset literal", start, start + len))?;
            self.pos += len;
            return Ok(Value::DateTimeOffset(v));
        }
        if let Some(len) = date_len(rest) {
            let text = &rest[..len];
            let v = NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map_err(|_| self.error("invalid Date literal", start, start + len))?;
            self.pos += len;
            return Ok(Value::Date(v));
        }
        if let Some(len) = time_len(rest) {
            let text = &rest[..len];
            let v = NaiveTime::from_str(text)
                .map_err(|_| self.error("invalid TimeOfDay literal", start, start + len))?;
            self.pos += len;
            return Ok(Value::TimeOfDay(v));
        }

        let bytes = rest.as_bytes();
        let mut i = usize::from(bytes[0] == b'-');
        let digits = |i: &mut usize| {
            let from = *i;
            while *i < bytes.len() && bytes[*i].is_ascii_digit() {
                *i += 1;
            }
            *i > from
        };
        digits(&mut i);
        let mut fractional = false;
        let mut exponent = false;
        if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
            if !digits(&mut i) {
                return Err(self.error("digits expected after decimal point", start, start + i));
            }
            fractional = true;
        }
        if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
            let mut j = i + 1;
            if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                j += 1;
            }
            let before = j;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > before {
                i = j;
                exponent = true;
            }
        }
        let text = &rest[..i];
        let suffix = bytes.get(i).map(|b| b.to_ascii_lowercase());
        let (value, consumed) = match suffix {
            Some(b'm') => (BigDecimal::from_str(text).ok().map(Value::Decimal), i + 1),
            Some(b'd' | b'f') => (text.parse::<f64>().ok().map(Value::Double), i + 1),
            Some(b'l') if !fractional && !exponent => (text.parse::<i64>().ok().map(Value::Int), i + 1),
            _ if exponent => (text.parse::<f64>().ok().map(Value::Double), i),
            _ if fractional => (BigDecimal::from_str(text).ok().map(Value::Decimal), i),
            _ => (
                text.parse::<i64>()
                    .ok()
                    .map(Value::Int)
                    .or_else(|| BigDecimal::from_str(text).ok().map(Value::Decimal)),
                i,
            ),
        };
        if rest[consumed..].starts_with(is_ident_char) {
            let end = rest[consumed..]
                .find(|c: char| !is_ident_char(c))
                .map_or(rest.len(), |n| consumed + n);
            return Err(self.error("malformed numeric literal", start, start + end));
        }
        let value = value.ok_or_else(|| self.error("malformed numeric literal", start, start + consumed))?;
        self.pos += consumed;
        Ok(value)
    }
}

fn matches_shape(s: &str, shape: &str) -> bool {
    s.len() >= shape.len()
        && s.bytes().zip(shape.bytes()).all(|(c, p)| match p {
            b'9' => c.is_ascii_digit(),
            b'x' => c.is_ascii_hexdigit(),
            _ => c == p,
        })
}

fn guid_len(s: &str) -> Option<usize> {
    const SHAPE: &str = "xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx";
    (matches_shape(s, SHAPE) && !s[SHAPE.len()..].starts_with(is_ident_char)).then_some(SHAPE.len())
}

fn date_len(s: &str) -> Option<usize> {
    const SHAPE: &str = "9999-99-99";
    (matches_shape(s, SHAPE) && !s[SHAPE.len()..].starts_with(|c: char| is_ident_char(c) || c == ':'))
        .then_some(SHAPE.len())
}

fn time_len(s: &str) -> Option<usize> {
    if !matches_shape(s, "99:99") {
        return None;
    }
    let mut len = 5;
    if matches_shape(&s[len..], ":99") {
        len += 3;
        if s[len..].starts_with('.') {
            let frac = s[len + 1..].bytes().take_while(u8::is_ascii_digit).count();
            if frac > 0 {
                len += 1 + frac;
            }
        }
    }
    Some(len)
}

fn datetime_len(s: &str) -> Option<usize> {
    if !matches_shape(s, "9999-99-99T") && !matches_shape(s, "9999-99-99t") {
        return None;
    }
    let mut len = 11 + time_len(&s[11..])?;
    let rest = &s[len..];
    if rest.starts_with(['Z', 'z']) {
        len += 1;
    } else if matches_shape(rest, "+99:99") || matches_shape(rest, "-99:99") {
        len += 6;
    } else {
        return None;
    }
    Some(len)
}

fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    // RFC 3339 requires seconds; OData allows omitting them.
    let normalized = if text.as_bytes().get(16) == Some(&b':') {
        text.to_owned()
    } else {
        format!("{}:00{}", &text[..16], &text[16..])
    };
    DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Parse a standalone literal, as stored in skip tokens.
///
/// # Errors
/// Returns [`ParseError`] when `text` is not exactly one literal.
pub fn parse_literal(option: &str, text: &str) -> Result<Value, ParseError> {
    let tokens = Lexer::new(option, text, 0).tokenize()?;
    match tokens.as_slice() {
        [Token { kind: TokenKind::Literal(v), .. }, Token { kind: TokenKind::End, .. }] => Ok(v.clone()),
        _ => Err(ParseError::new(option, "expected a single literal", 0, text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(s: &str) -> Vec<TokenKind> {
        Lexer::new("$filter", s, 0)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_literals() {
        assert_eq!(
            kinds("'O''Neil' 42 -3 1.5 2e3 7m"),
            vec![
                TokenKind::Literal(Value::from("O'Neil")),
                TokenKind::Literal(Value::Int(42)),
                TokenKind::Literal(Value::Int(-3)),
                TokenKind::Literal(Value::Decimal(BigDecimal::from_str("1.5").unwrap())),
                TokenKind::Literal(Value::Double(2000.0)),
                TokenKind::Literal(Value::Decimal(BigDecimal::from(7))),
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn lexes_temporal_and_guid() {
        let k = kinds("2024-01-02T03:04:05Z 2024-01-02 13:30:00 01234567-89ab-cdef-0123-456789abcdef duration'PT1H'");
        assert!(matches!(k[0], TokenKind::Literal(Value::DateTimeOffset(_))));
        assert!(matches!(k[1], TokenKind::Literal(Value::Date(_))));
        assert!(matches!(k[2], TokenKind::Literal(Value::TimeOfDay(_))));
        assert!(matches!(k[3], TokenKind::Literal(Value::Guid(_))));
        assert!(matches!(k[4], TokenKind::Literal(Value::Duration(_))));
    }

    #[test]
    fn datetime_without_seconds() {
        let k = kinds("2024-01-02T03:04+02:00");
        let TokenKind::Literal(Value::DateTimeOffset(d)) = &k[0] else {
            panic!("expected datetime, got {k:?}");
        };
        assert_eq!(d.to_rfc3339(), "2024-01-02T01:04:00+00:00");
    }

    #[test]
    fn lexes_paths_and_enums() {
        assert_eq!(
            kinds("Address/City Ns.Color'Red' $it"),
            vec![
                TokenKind::Ident("Address".to_owned()),
                TokenKind::Slash,
                TokenKind::Ident("City".to_owned()),
                TokenKind::EnumLiteral {
                    type_name: "Ns.Color".to_owned(),
                    member: "Red".to_owned()
                },
                TokenKind::Ident("$it".to_owned()),
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn reports_position_of_bad_input() {
        let err = Lexer::new("$filter", "Name eq 'abc", 0).tokenize().unwrap_err();
        assert_eq!(err.position, 8);
        assert!(err.message.contains("unterminated"));

        let err = Lexer::new("$filter", "Age gt 12abc", 0).tokenize().unwrap_err();
        assert_eq!(err.token, "12abc");
    }

    #[test]
    fn standalone_literal() {
        assert_eq!(parse_literal("$skiptoken", "'x'").unwrap(), Value::from("x"));
        assert!(parse_literal("$skiptoken", "Name").is_err());
    }
}
