//! Multi-key stable ordering.

use std::cmp::Ordering;
use std::sync::Arc;

use odata_edm::{Record, Value};

use crate::compile::{CompiledOrder, Scope};
use crate::error::ExecutionError;
use crate::syntax::ast::SortDir;

/// A row with its evaluated ordering values.
pub(crate) type Keyed = (Vec<Value>, Arc<Record>);

/// Ordering values of `row`, one per clause.
pub(crate) fn order_keys(
    row: &Arc<Record>,
    order: &[CompiledOrder],
    params: &[Value],
) -> Result<Vec<Value>, ExecutionError> {
    let it = Value::Record(row.clone());
    let scope = Scope::root(&it, params);
    order.iter().map(|o| o.expr.eval(&scope)).collect()
}

/// Lexicographic comparison of two key tuples; nulls sort first.
pub(crate) fn compare_keys(a: &[Value], b: &[Value], order: &[CompiledOrder]) -> Ordering {
    for ((x, y), o) in a.iter().zip(b).zip(order) {
        let ord = x.sort_cmp(y);
        let ord = match o.direction {
            SortDir::Asc => ord,
            SortDir::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Evaluate keys and sort stably; equal rows keep their source order.
pub(crate) fn sort_rows(
    rows: Vec<Arc<Record>>,
    order: &[CompiledOrder],
    params: &[Value],
) -> Result<Vec<Keyed>, ExecutionError> {
    let mut keyed = rows
        .into_iter()
        .map(|row| Ok((order_keys(&row, order, params)?, row)))
        .collect::<Result<Vec<Keyed>, ExecutionError>>()?;
    if !order.is_empty() {
        keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, order));
    }
    Ok(keyed)
}
