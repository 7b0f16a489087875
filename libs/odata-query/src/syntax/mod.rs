//! Query-option syntax: splitting, lexing and the per-option grammars.

pub mod apply;
pub mod ast;
pub mod expr;
pub mod lexer;
pub mod search;
pub mod select_expand;
pub mod split;

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::ParseError;
use crate::settings::{ParserSettings, QueryOption};
use ast::{ComputeItem, Expr, ExpandItem, OrderByItem, SearchExpr, SelectItem, Transformation};

pub use apply::{parse_apply, parse_compute};
pub use expr::{parse_expression, parse_orderby};
pub use search::parse_search;
pub use select_expand::{parse_expand, parse_select};
pub use split::{RawOptions, split_query};

/// Every recognized option of one request, parsed but not yet bound.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedQuery {
    pub filter: Option<Expr>,
    pub orderby: Vec<OrderByItem>,
    pub select: Option<Vec<SelectItem>>,
    pub expand: Vec<ExpandItem>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
    pub count: Option<bool>,
    pub apply: Vec<Transformation>,
    pub search: Option<SearchExpr>,
    pub compute: Vec<ComputeItem>,
    /// Opaque; decoded once the ordering is bound.
    pub skiptoken: Option<String>,
    pub custom: Vec<(String, String)>,
    /// Options that appeared in the query string, empty values included.
    pub present: BTreeSet<QueryOption>,
}

impl ParsedQuery {
    /// Parse options already split by [`split_query`].
    ///
    /// # Errors
    /// Returns the first [`ParseError`] in canonical option order.
    pub fn from_raw(raw: RawOptions) -> Result<Self, ParseError> {
        let mut q = ParsedQuery {
            present: raw.system.keys().copied().collect(),
            custom: raw.custom,
            ..ParsedQuery::default()
        };
        for (option, value) in &raw.system {
            let option = *option;
            let name = option.name();
            if value.trim().is_empty() && option != QueryOption::SkipToken {
                return Err(ParseError::new(name, "option value is empty", 0, ""));
            }
            match option {
                QueryOption::Filter => q.filter = Some(parse_expression(name, value, 0)?),
                QueryOption::OrderBy => q.orderby = parse_orderby(name, value, 0)?,
                QueryOption::Select => q.select = Some(parse_select(name, value, 0)?),
                QueryOption::Expand => q.expand = parse_expand(name, value, 0)?,
                QueryOption::Top => q.top = Some(split::parse_usize(name, value, 0)?),
                QueryOption::Skip => q.skip = Some(split::parse_usize(name, value, 0)?),
                QueryOption::Count => q.count = Some(split::parse_bool(name, value, 0)?),
                QueryOption::Apply => q.apply = parse_apply(value, 0)?,
                QueryOption::Search => q.search = Some(parse_search(value, 0)?),
                QueryOption::Compute => q.compute = parse_compute(value, 0)?,
                QueryOption::SkipToken => q.skiptoken = Some(value.clone()),
            }
            debug!(option = name, "parsed query option");
        }
        Ok(q)
    }
}

/// Split and parse a raw query string.
///
/// # Errors
/// Returns [`ParseError`] naming the option, offending text and position.
pub fn parse_query(raw: &str, settings: &ParserSettings) -> Result<ParsedQuery, ParseError> {
    ParsedQuery::from_raw(split_query(raw, settings)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_options() {
        let q = parse_query(
            "$filter=Age gt 3&$orderby=Name desc&$select=Name,Age&$expand=Orders&$top=5&$skip=2\
             &$count=true&$search=blue&$compute=Age add 1 as Next&$skiptoken=abc&x=1",
            &ParserSettings::default(),
        )
        .unwrap();
        assert!(q.filter.is_some());
        assert_eq!(q.orderby.len(), 1);
        assert_eq!(q.select.as_ref().map(Vec::len), Some(2));
        assert_eq!(q.expand.len(), 1);
        assert_eq!((q.top, q.skip, q.count), (Some(5), Some(2), Some(true)));
        assert!(q.search.is_some());
        assert_eq!(q.compute[0].alias, "Next");
        assert_eq!(q.skiptoken.as_deref(), Some("abc"));
        assert_eq!(q.custom, vec![("x".to_owned(), "1".to_owned())]);
        assert_eq!(q.present.len(), 10);
    }

    #[test]
    fn negative_top_fails_at_parse_time() {
        let err = parse_query("$top=-1", &ParserSettings::default()).unwrap_err();
        assert_eq!(err.option, "$top");
    }

    #[test]
    fn empty_filter_is_an_error() {
        let err = parse_query("$filter=", &ParserSettings::default()).unwrap_err();
        assert_eq!(err.option, "$filter");
    }
}
