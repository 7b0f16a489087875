//! `$search` term matching.

use odata_edm::{Record, Value};

use crate::syntax::ast::SearchExpr;

/// Decides whether a single search term matches a record.
pub trait SearchMatcher: Send + Sync {
    fn matches(&self, record: &Record, term: &str) -> bool;
}

/// Case-insensitive substring match against every string value, nested
/// complex values and string collections included.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContainsMatcher;

fn contains(v: &Value, needle: &str) -> bool {
    match v {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Record(r) => r.properties().any(|(_, v)| contains(v, needle)),
        Value::Collection(items) => items.iter().any(|i| contains(i, needle)),
        _ => false,
    }
}

impl SearchMatcher for ContainsMatcher {
    fn matches(&self, record: &Record, term: &str) -> bool {
        let needle = term.to_lowercase();
        record.properties().any(|(_, v)| contains(v, &needle))
    }
}

pub(crate) fn search_matches(matcher: &dyn SearchMatcher, record: &Record, expr: &SearchExpr) -> bool {
    expr.evaluate(&mut |term: &str| matcher.matches(record, term))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_search;

    #[test]
    fn boolean_search_over_strings() {
        let book = Record::new("Ns.Book")
            .with("Title", "The Rust Book")
            .with("Tags", Value::from(vec![Value::from("Systems")]))
            .with("Pages", 500);
        let run = |q: &str| search_matches(&ContainsMatcher, &book, &parse_search(q, 0).unwrap());
        assert!(run("rust"));
        assert!(run("systems AND book"));
        assert!(!run("rust AND NOT book"));
        assert!(run("python OR \"rust book\""));
        assert!(!run("500"));
    }
}
