//! Recursive-descent parser for common expressions, `$orderby` and the
//! expression-bearing parts of `$compute` and `$apply`.
//!
//! Precedence, loosest first: `or`, `and`, `eq`/`ne`, relational
//! (`gt ge lt le has in`), additive, multiplicative, unary (`not`, `-`).

use super::ast::{BinaryOp, Expr, LambdaKind, OrderByItem, SortDir, TypeCheckKind, UnaryOp};
use super::lexer::{Lexer, Token, TokenKind};
use crate::error::ParseError;

/// Deepest nesting the parser accepts before bailing out.
pub const MAX_NESTING: usize = 64;

pub(crate) struct Parser<'a> {
    option: &'a str,
    text: &'a str,
    base: usize,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(option: &'a str, text: &'a str, base: usize) -> Result<Self, ParseError> {
        let tokens = Lexer::new(option, text, base).tokenize()?;
        Ok(Self {
            option,
            text,
            base,
            tokens,
            pos: 0,
            depth: 0,
        })
    }

    fn current(&self) -> &Token {
        // The token list always ends with `End`, and `advance` never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    pub(crate) fn peek(&self) -> &TokenKind {
        &self.current().kind
    }

    pub(crate) fn peek_at(&self, offset: usize) -> &TokenKind {
        let i = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[i].kind
    }

    fn advance(&mut self) -> Token {
        let t = self.current().clone();
        if t.kind != TokenKind::End {
            self.pos += 1;
        }
        t
    }

    pub(crate) fn error_at(&self, token: &Token, message: impl Into<String>) -> ParseError {
        let start = token.start.saturating_sub(self.base);
        let end = token.end.saturating_sub(self.base);
        let text = if token.kind == TokenKind::End {
            ""
        } else {
            self.text.get(start..end).unwrap_or_default()
        };
        ParseError::new(self.option, message, token.start, text)
    }

    pub(crate) fn error_here(&self, message: impl Into<String>) -> ParseError {
        self.error_at(self.current(), message)
    }

    pub(crate) fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), ParseError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error_here(format!("expected {what}")))
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), TokenKind::Ident(s) if s == keyword)
    }

    /// Consume the identifier `keyword` if it is next.
    pub(crate) fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek() {
            TokenKind::Ident(s) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            _ => Err(self.error_here(format!("expected {what}"))),
        }
    }

    /// Require that all input has been consumed.
    pub(crate) fn finish(&self) -> Result<(), ParseError> {
        if *self.peek() == TokenKind::End {
            Ok(())
        } else {
            Err(self.error_here("unexpected trailing input"))
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error_here("expression is nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    pub(crate) fn expression(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let result = self.or_expr();
        self.leave();
        result
    }

    fn binary_level(
        &mut self,
        ops: &[BinaryOp],
        next: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let mut left = next(self)?;
        loop {
            let op = match self.peek() {
                TokenKind::Ident(s) => ops.iter().copied().find(|op| op.keyword() == s),
                _ => None,
            };
            let Some(op) = op else {
                return Ok(left);
            };
            self.advance();
            let right = next(self)?;
            left = Expr::binary(op, left, right);
        }
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[BinaryOp::Or], Self::and_expr)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[BinaryOp::And], Self::equality)
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[BinaryOp::Eq, BinaryOp::Ne], Self::relational)
    }

    fn relational(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.additive()?;
        loop {
            if self.eat_keyword("in") {
                let list = self.in_list()?;
                left = Expr::In {
                    operand: Box::new(left),
                    list,
                };
                continue;
            }
            let op = match self.peek() {
                TokenKind::Ident(s) => [
                    BinaryOp::Gt,
                    BinaryOp::Ge,
                    BinaryOp::Lt,
                    BinaryOp::Le,
                    BinaryOp::Has,
                ]
                .into_iter()
                .find(|op| op.keyword() == s),
                _ => None,
            };
            let Some(op) = op else {
                return Ok(left);
            };
            self.advance();
            let right = self.additive()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn in_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(&TokenKind::OpenParen, "`(` after `in`")?;
        let mut list = Vec::new();
        if self.eat(&TokenKind::CloseParen) {
            return Err(self.error_here("`in` list must not be empty"));
        }
        loop {
            list.push(self.expression()?);
            if self.eat(&TokenKind::CloseParen) {
                return Ok(list);
            }
            self.expect(&TokenKind::Comma, "`,` or `)` in `in` list")?;
        }
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[BinaryOp::Add, BinaryOp::Sub], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[BinaryOp::Mul, BinaryOp::Div, BinaryOp::DivBy, BinaryOp::Mod],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = if self.is_keyword("not") {
            Some(UnaryOp::Not)
        } else if *self.peek() == TokenKind::Minus {
            Some(UnaryOp::Negate)
        } else {
            None
        };
        let Some(op) = op else {
            return self.primary();
        };
        self.advance();
        self.enter()?;
        let operand = self.unary();
        self.leave();
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand?),
        })
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Literal(v) => Ok(Expr::Literal(v)),
            TokenKind::EnumLiteral { type_name, member } => {
                Ok(Expr::EnumLiteral { type_name, member })
            }
            TokenKind::OpenParen => {
                let inner = self.expression()?;
                self.expect(&TokenKind::CloseParen, "`)`")?;
                Ok(inner)
            }
            TokenKind::Ident(ref name) => {
                let head = self.path_head(name.clone(), &token)?;
                self.path_tail(head)
            }
            TokenKind::End => Err(self.error_at(&token, "unexpected end of expression")),
            _ => Err(self.error_at(&token, "expected an expression")),
        }
    }

    fn path_head(&mut self, name: String, token: &Token) -> Result<Expr, ParseError> {
        if *self.peek() == TokenKind::OpenParen {
            self.advance();
            return match name.as_str() {
                "cast" => self.type_check(TypeCheckKind::Cast),
                "isof" => self.type_check(TypeCheckKind::IsOf),
                _ => {
                    let args = self.call_args()?;
                    Ok(Expr::Call {
                        parent: None,
                        name,
                        args,
                    })
                }
            };
        }
        match name.as_str() {
            "$it" | "$this" => Ok(Expr::RangeVariable(name)),
            "$count" => Err(self.error_at(token, "`$count` must follow a collection path")),
            _ => Ok(Expr::member(name)),
        }
    }

    fn path_tail(&mut self, mut current: Expr) -> Result<Expr, ParseError> {
        while self.eat(&TokenKind::Slash) {
            let token = self.current().clone();
            let name = self.ident("a path segment after `/`")?;
            let call = *self.peek() == TokenKind::OpenParen;
            current = match name.as_str() {
                "any" | "all" if call => {
                    let kind = if name == "any" {
                        LambdaKind::Any
                    } else {
                        LambdaKind::All
                    };
                    self.lambda(kind, current)?
                }
                "$count" => Expr::Count(Box::new(current)),
                _ if name.starts_with('$') => {
                    return Err(self.error_at(&token, format!("unexpected `{name}` in path")));
                }
                _ if call => {
                    self.advance();
                    let args = self.call_args()?;
                    Expr::Call {
                        parent: Some(Box::new(current)),
                        name,
                        args,
                    }
                }
                _ => Expr::Member {
                    parent: Some(Box::new(current)),
                    name,
                },
            };
        }
        Ok(current)
    }

    fn lambda(&mut self, kind: LambdaKind, source: Expr) -> Result<Expr, ParseError> {
        self.expect(&TokenKind::OpenParen, "`(`")?;
        if self.eat(&TokenKind::CloseParen) {
            return Ok(Expr::Lambda {
                kind,
                source: Box::new(source),
                variable: None,
                body: None,
            });
        }
        let variable = self.ident("a lambda variable")?;
        if *self.peek_at(0) != TokenKind::Colon {
            return Err(self.error_here("expected `:` after lambda variable"));
        }
        self.advance();
        let body = self.expression()?;
        self.expect(&TokenKind::CloseParen, "`)` closing the lambda")?;
        Ok(Expr::Lambda {
            kind,
            source: Box::new(source),
            variable: Some(variable),
            body: Some(Box::new(body)),
        })
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.eat(&TokenKind::CloseParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&TokenKind::CloseParen) {
                return Ok(args);
            }
            self.expect(&TokenKind::Comma, "`,` or `)` in argument list")?;
        }
    }

    /// `cast(Type)`, `cast(expr, Type)` and the same for `isof`.
    fn type_check(&mut self, kind: TypeCheckKind) -> Result<Expr, ParseError> {
        let is_type_name =
            |t: &TokenKind| matches!(t, TokenKind::Ident(s) if s.contains('.'));
        if is_type_name(self.peek()) && *self.peek_at(1) == TokenKind::CloseParen {
            let type_name = self.ident("a type name")?;
            self.advance();
            return Ok(Expr::TypeCheck {
                kind,
                operand: None,
                type_name,
            });
        }
        let operand = self.expression()?;
        self.expect(&TokenKind::Comma, "`,` before the type name")?;
        let type_name = self.ident("a type name")?;
        self.expect(&TokenKind::CloseParen, "`)`")?;
        Ok(Expr::TypeCheck {
            kind,
            operand: Some(Box::new(operand)),
            type_name,
        })
    }

    pub(crate) fn orderby_item(&mut self) -> Result<OrderByItem, ParseError> {
        let expr = self.expression()?;
        let direction = match self.peek() {
            TokenKind::Ident(s) if s.eq_ignore_ascii_case("asc") => {
                self.advance();
                SortDir::Asc
            }
            TokenKind::Ident(s) if s.eq_ignore_ascii_case("desc") => {
                self.advance();
                SortDir::Desc
            }
            _ => SortDir::Asc,
        };
        Ok(OrderByItem { expr, direction })
    }
}

/// Parse a complete boolean or value expression.
///
/// # Errors
/// Returns [`ParseError`] with the offending position and token.
pub fn parse_expression(option: &str, text: &str, base: usize) -> Result<Expr, ParseError> {
    let mut p = Parser::new(option, text, base)?;
    if *p.peek() == TokenKind::End {
        return Err(p.error_here("expression is empty"));
    }
    let expr = p.expression()?;
    p.finish()?;
    Ok(expr)
}

/// Parse a comma-separated `$orderby` list.
///
/// # Errors
/// Returns [`ParseError`] for empty items or malformed expressions.
pub fn parse_orderby(option: &str, text: &str, base: usize) -> Result<Vec<OrderByItem>, ParseError> {
    let mut p = Parser::new(option, text, base)?;
    let mut items = Vec::new();
    loop {
        if matches!(p.peek(), TokenKind::Comma | TokenKind::End) {
            return Err(p.error_here("empty $orderby item"));
        }
        items.push(p.orderby_item()?);
        if !p.eat(&TokenKind::Comma) {
            break;
        }
    }
    p.finish()?;
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(s: &str) -> Expr {
        parse_expression("$filter", s, 0).unwrap()
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let e = filter("A eq 1 or B eq 2 and C eq 3");
        assert_eq!(e.to_string(), "(A eq 1) or ((B eq 2) and (C eq 3))");
    }

    #[test]
    fn arithmetic_precedence() {
        let e = filter("Price mul 2 add 1 gt 10");
        assert_eq!(e.to_string(), "((Price mul 2) add 1) gt 10");
    }

    #[test]
    fn not_and_parens() {
        let e = filter("not (Age gt 3)");
        assert_eq!(e.to_string(), "not (Age gt 3)");
        let e = filter("not contains(Name,'x')");
        assert_eq!(e.to_string(), "not contains(Name,'x')");
    }

    #[test]
    fn lambdas_and_count() {
        let e = filter("Orders/any(o:o/Total gt 100) and Orders/$count ge 2");
        assert_eq!(
            e.to_string(),
            "Orders/any(o:o/Total gt 100) and (Orders/$count ge 2)"
        );
        assert!(matches!(filter("Tags/any()"), Expr::Lambda { body: None, .. }));
    }

    #[test]
    fn in_and_has_and_cast() {
        assert_eq!(filter("Name in ('a','b')").to_string(), "Name in ('a','b')");
        assert_eq!(
            filter("Color has Ns.Color'Red'").to_string(),
            "Color has Ns.Color'Red'"
        );
        assert!(matches!(
            filter("isof(Ns.VipCustomer)"),
            Expr::TypeCheck { operand: None, .. }
        ));
        assert!(matches!(
            filter("cast(Age,Edm.Double) gt 1"),
            Expr::Binary { .. }
        ));
    }

    #[test]
    fn canonical_text_reparses_to_same_tree() {
        for src in [
            "A eq 1 or B eq 2 and not C",
            "contains(tolower(Name),'o''neil') and Address/City eq 'Oslo'",
            "-Price lt -3 and Price mod 2 eq 0",
            "Orders/all(o:o/Lines/any(l:l/Qty gt 1))",
        ] {
            let once = filter(src);
            let twice = filter(&once.to_string());
            assert_eq!(once, twice, "{src}");
        }
    }

    #[test]
    fn errors_carry_position() {
        let err = parse_expression("$filter", "Name eq", 0).unwrap_err();
        assert_eq!(err.position, 7);
        let err = parse_expression("$filter", "Name eq 'a' )", 0).unwrap_err();
        assert_eq!(err.token, ")");
        assert_eq!(err.position, 12);
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let src = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        let err = parse_expression("$filter", &src, 0).unwrap_err();
        assert!(err.message.contains("nested"));
    }

    #[test]
    fn orderby_directions() {
        let items = parse_orderby("$orderby", "Name desc,Age,year(Born) asc", 0).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].direction, SortDir::Desc);
        assert_eq!(items[1].direction, SortDir::Asc);
        assert!(parse_orderby("$orderby", "Name,", 0).is_err());
    }
}
