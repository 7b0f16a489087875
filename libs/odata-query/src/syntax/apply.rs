//! `$apply` transformation sequences and `$compute` lists.

use super::ast::{Aggregate, AggregateMethod, ComputeItem, Transformation};
use super::expr::Parser;
use super::lexer::TokenKind;
use crate::error::ParseError;

fn alias(p: &mut Parser<'_>) -> Result<String, ParseError> {
    if !p.eat_keyword("as") {
        return Err(p.error_here("expected `as`"));
    }
    let here = p.error_here("alias must be a simple identifier");
    let name = p.ident("an alias")?;
    if name.contains('.') || name.starts_with('$') {
        return Err(here);
    }
    Ok(name)
}

fn aggregate_list(p: &mut Parser<'_>) -> Result<Vec<Aggregate>, ParseError> {
    p.expect(&TokenKind::OpenParen, "`(` after `aggregate`")?;
    let mut out = Vec::new();
    loop {
        let is_count = matches!(p.peek(), TokenKind::Ident(s) if s == "$count")
            && matches!(p.peek_at(1), TokenKind::Ident(s) if s == "as");
        if is_count {
            p.ident("$count")?;
            out.push(Aggregate::Count { alias: alias(p)? });
        } else {
            let expr = p.expression()?;
            if !p.eat_keyword("with") {
                return Err(p.error_here("expected `with` and an aggregation method"));
            }
            let here = p.error_here("unknown aggregation method");
            let method = AggregateMethod::from_keyword(&p.ident("an aggregation method")?).ok_or(here)?;
            out.push(Aggregate::Property {
                expr,
                method,
                alias: alias(p)?,
            });
        }
        if p.eat(&TokenKind::CloseParen) {
            return Ok(out);
        }
        p.expect(&TokenKind::Comma, "`,` or `)` in aggregate list")?;
    }
}

fn group_path(p: &mut Parser<'_>) -> Result<Vec<String>, ParseError> {
    let mut path = vec![p.ident("a grouping property")?];
    while p.eat(&TokenKind::Slash) {
        path.push(p.ident("a path segment after `/`")?);
    }
    Ok(path)
}

fn transformation(p: &mut Parser<'_>) -> Result<Transformation, ParseError> {
    let here = p.error_here("unsupported transformation");
    let name = p.ident("a transformation")?;
    match name.as_str() {
        "filter" => {
            p.expect(&TokenKind::OpenParen, "`(` after `filter`")?;
            let e = p.expression()?;
            p.expect(&TokenKind::CloseParen, "`)`")?;
            Ok(Transformation::Filter(e))
        }
        "aggregate" => Ok(Transformation::Aggregate(aggregate_list(p)?)),
        "groupby" => {
            p.expect(&TokenKind::OpenParen, "`(` after `groupby`")?;
            p.expect(&TokenKind::OpenParen, "`(` opening the grouping properties")?;
            let mut paths = vec![group_path(p)?];
            while p.eat(&TokenKind::Comma) {
                paths.push(group_path(p)?);
            }
            p.expect(&TokenKind::CloseParen, "`)` closing the grouping properties")?;
            let mut aggregates = Vec::new();
            if p.eat(&TokenKind::Comma) {
                if !p.eat_keyword("aggregate") {
                    return Err(p.error_here("expected `aggregate(...)` inside groupby"));
                }
                aggregates = aggregate_list(p)?;
            }
            p.expect(&TokenKind::CloseParen, "`)` closing groupby")?;
            Ok(Transformation::GroupBy { paths, aggregates })
        }
        _ => Err(here),
    }
}

/// Parse a `/`-separated `$apply` sequence.
///
/// # Errors
/// Returns [`ParseError`] for unknown transformations or malformed arguments.
pub fn parse_apply(text: &str, base: usize) -> Result<Vec<Transformation>, ParseError> {
    let mut p = Parser::new("$apply", text, base)?;
    let mut out = vec![transformation(&mut p)?];
    while p.eat(&TokenKind::Slash) {
        out.push(transformation(&mut p)?);
    }
    p.finish()?;
    Ok(out)
}

/// Parse a comma-separated `$compute` list of `expr as Alias`.
///
/// # Errors
/// Returns [`ParseError`] for a missing alias or a malformed expression.
pub fn parse_compute(text: &str, base: usize) -> Result<Vec<ComputeItem>, ParseError> {
    let mut p = Parser::new("$compute", text, base)?;
    let mut out = Vec::new();
    loop {
        let expr = p.expression()?;
        out.push(ComputeItem {
            expr,
            alias: alias(&mut p)?,
        });
        if !p.eat(&TokenKind::Comma) {
            break;
        }
    }
    p.finish()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::ast::join;

    #[test]
    fn apply_sequence() {
        let text = "filter(Price gt 1)/groupby((Category,Address/City),aggregate(Price with sum as Total,$count as N))";
        let t = parse_apply(text, 0).unwrap();
        assert_eq!(t.len(), 2);
        let Transformation::GroupBy { paths, aggregates } = &t[1] else {
            panic!("expected groupby");
        };
        assert_eq!(paths[1], vec!["Address".to_owned(), "City".to_owned()]);
        assert_eq!(aggregates[1], Aggregate::Count { alias: "N".to_owned() });
        let rendered: Vec<_> = t.iter().map(ToString::to_string).collect();
        assert_eq!(rendered.join("/"), text);
    }

    #[test]
    fn apply_errors() {
        assert!(parse_apply("topcount(1,Price)", 0).is_err());
        assert!(parse_apply("aggregate(Price with median as M)", 0).is_err());
        assert!(parse_apply("groupby(Category)", 0).is_err());
    }

    #[test]
    fn compute_items() {
        let items = parse_compute("Price mul Qty as Total,year(Born) as BornYear", 0).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(join(&items), "Price mul Qty as Total,year(Born) as BornYear");
        assert!(parse_compute("Price mul 2", 0).is_err());
        assert!(parse_compute("Price as Ns.Bad", 0).is_err());
    }
}
