//! `$search` grammar: terms, `"phrases"`, `AND`, `OR`, `NOT`, parentheses and
//! implicit `AND` between adjacent terms.

use super::ast::SearchExpr;
use crate::error::ParseError;

const OPTION: &str = "$search";
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Word(String),
    Phrase(String),
    And,
    Or,
    Not,
    Open,
    Close,
}

fn tokenize(text: &str, base: usize) -> Result<Vec<(usize, Tok)>, ParseError> {
    let mut out = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some(&(i, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        match c {
            '(' => {
                chars.next();
                out.push((i, Tok::Open));
            }
            ')' => {
                chars.next();
                out.push((i, Tok::Close));
            }
            '"' => {
                chars.next();
                let mut phrase = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some((_, escaped)) = chars.next() {
                                phrase.push(escaped);
                            }
                        }
                        '"' => {
                            closed = true;
                            break;
                        }
                        _ => phrase.push(c),
                    }
                }
                if !closed {
                    return Err(ParseError::new(OPTION, "unterminated phrase", base + i, &text[i..]));
                }
                out.push((i, Tok::Phrase(phrase)));
            }
            _ => {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                let tok = match word.as_str() {
                    "AND" => Tok::And,
                    "OR" => Tok::Or,
                    "NOT" => Tok::Not,
                    _ => Tok::Word(word),
                };
                out.push((i, tok));
            }
        }
    }
    Ok(out)
}

struct SearchParser<'a> {
    text: &'a str,
    base: usize,
    tokens: Vec<(usize, Tok)>,
    pos: usize,
    depth: usize,
}

impl SearchParser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn error(&self, message: &str) -> ParseError {
        match self.tokens.get(self.pos) {
            Some((at, _)) => {
                let rest = &self.text[*at..];
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                ParseError::new(OPTION, message, self.base + at, &rest[..end])
            }
            None => ParseError::new(OPTION, message, self.base + self.text.len(), ""),
        }
    }

    fn or(&mut self) -> Result<SearchExpr, ParseError> {
        let mut left = self.and()?;
        while self.peek() == Some(&Tok::Or) {
            self.pos += 1;
            let right = self.and()?;
            left = SearchExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<SearchExpr, ParseError> {
        let mut left = self.unary()?;
        loop {
            match self.peek() {
                Some(Tok::And) => self.pos += 1,
                Some(Tok::Word(_) | Tok::Phrase(_) | Tok::Not | Tok::Open) => {}
                _ => return Ok(left),
            }
            let right = self.unary()?;
            left = SearchExpr::And(Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<SearchExpr, ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("search expression is nested too deeply"));
        }
        let result = self.unary_inner();
        self.depth -= 1;
        result
    }

    fn unary_inner(&mut self) -> Result<SearchExpr, ParseError> {
        match self.peek().cloned() {
            Some(Tok::Not) => {
                self.pos += 1;
                Ok(SearchExpr::Not(Box::new(self.unary()?)))
            }
            Some(Tok::Open) => {
                self.pos += 1;
                let inner = self.or()?;
                if self.peek() != Some(&Tok::Close) {
                    return Err(self.error("expected `)`"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(Tok::Word(w) | Tok::Phrase(w)) => {
                self.pos += 1;
                Ok(SearchExpr::Term(w))
            }
            _ => Err(self.error("expected a search term")),
        }
    }
}

/// Parse a `$search` expression.
///
/// # Errors
/// Returns [`ParseError`] for dangling operators, unbalanced parentheses or
/// an unterminated phrase.
pub fn parse_search(text: &str, base: usize) -> Result<SearchExpr, ParseError> {
    let tokens = tokenize(text, base)?;
    let mut p = SearchParser {
        text,
        base,
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = p.or()?;
    if p.pos < p.tokens.len() {
        return Err(p.error("unexpected trailing input"));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(s: &str) -> Box<SearchExpr> {
        Box::new(SearchExpr::Term(s.to_owned()))
    }

    #[test]
    fn implicit_and_binds_tighter_than_or() {
        let e = parse_search("blue green OR red", 0).unwrap();
        assert_eq!(
            e,
            SearchExpr::Or(Box::new(SearchExpr::And(term("blue"), term("green"))), term("red"))
        );
    }

    #[test]
    fn phrases_not_and_parens() {
        let e = parse_search("NOT (\"dark blue\" OR red)", 0).unwrap();
        assert_eq!(
            e,
            SearchExpr::Not(Box::new(SearchExpr::Or(term("dark blue"), term("red"))))
        );
        assert_eq!(e.to_string(), "NOT (\"dark blue\" OR red)");
    }

    #[test]
    fn malformed_search() {
        assert!(parse_search("", 0).is_err());
        assert!(parse_search("blue AND", 0).is_err());
        assert!(parse_search("(blue", 0).is_err());
        let err = parse_search("\"open", 0).unwrap_err();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn evaluates_with_matcher() {
        let e = parse_search("blue -x OR NOT red", 0).unwrap();
        let hay = "a blue -x sky";
        assert!(e.evaluate(&mut |t| hay.contains(t)));
    }
}
