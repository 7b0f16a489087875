//! `$apply` execution: filtering, grouping and aggregation.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bigdecimal::BigDecimal;
use odata_edm::{Record, Value};

use crate::compile::plan::{CompiledAggregate, CompiledGroupKey, CompiledTransformation};
use crate::compile::{Scope, ops};
use crate::error::ExecutionError;
use crate::syntax::ast::{AggregateMethod, BinaryOp};

/// Run every transformation in order.
pub(crate) fn apply_transformations(
    mut rows: Vec<Arc<Record>>,
    transformations: &[CompiledTransformation],
    params: &[Value],
) -> Result<Vec<Arc<Record>>, ExecutionError> {
    for t in transformations {
        rows = match t {
            CompiledTransformation::Filter(predicate) => {
                let mut kept = Vec::with_capacity(rows.len());
                for row in rows {
                    let it = Value::Record(row.clone());
                    if predicate.matches(&Scope::root(&it, params))? {
                        kept.push(row);
                    }
                }
                kept
            }
            CompiledTransformation::GroupBy {
                keys,
                aggregates,
                result_type,
            } => group(&rows, keys, aggregates, result_type, params)?,
            CompiledTransformation::Aggregate {
                aggregates,
                result_type,
            } => group(&rows, &[], aggregates, result_type, params)?,
        };
    }
    Ok(rows)
}

fn group(
    rows: &[Arc<Record>],
    keys: &[CompiledGroupKey],
    aggregates: &[CompiledAggregate],
    result_type: &Arc<str>,
    params: &[Value],
) -> Result<Vec<Arc<Record>>, ExecutionError> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(Vec<Value>, Vec<Arc<Record>>)> = Vec::new();
    for row in rows {
        let it = Value::Record(row.clone());
        let scope = Scope::root(&it, params);
        let values = keys
            .iter()
            .map(|k| k.expr.eval(&scope))
            .collect::<Result<Vec<_>, _>>()?;
        let signature = values
            .iter()
            .map(Value::to_literal)
            .collect::<Vec<_>>()
            .join("\u{1f}");
        match index.entry(signature) {
            Entry::Occupied(e) => groups[*e.get()].1.push(row.clone()),
            Entry::Vacant(e) => {
                e.insert(groups.len());
                groups.push((values, vec![row.clone()]));
            }
        }
    }
    // A plain aggregate over no rows still yields one row.
    if keys.is_empty() && groups.is_empty() {
        groups.push((Vec::new(), Vec::new()));
    }
    groups
        .into_iter()
        .map(|(values, members)| {
            let mut record = Record::new(result_type.clone());
            for (key, value) in keys.iter().zip(values) {
                place(&mut record, result_type, &key.segments, value);
            }
            for agg in aggregates {
                let (alias, value) = aggregate(agg, &members, params)?;
                record.set(alias.clone(), value);
            }
            Ok(Arc::new(record))
        })
        .collect()
}

/// Store `value` under a possibly nested group-key path.
fn place(record: &mut Record, type_name: &str, segments: &[Arc<str>], value: Value) {
    match segments {
        [] => {}
        [name] => record.set(name.clone(), value),
        [name, rest @ ..] => {
            let nested_type = format!("{type_name}/{name}");
            let mut nested = record
                .get(name)
                .and_then(Value::as_record)
                .map_or_else(|| Record::new(nested_type.as_str()), |r| (**r).clone());
            place(&mut nested, &nested_type, rest, value);
            record.set(name.clone(), nested);
        }
    }
}

fn aggregate<'a>(
    agg: &'a CompiledAggregate,
    members: &[Arc<Record>],
    params: &[Value],
) -> Result<(&'a Arc<str>, Value), ExecutionError> {
    let (alias, method, expr) = match agg {
        CompiledAggregate::Count { alias } => {
            return Ok((alias, Value::Int(i64::try_from(members.len()).unwrap_or(i64::MAX))));
        }
        CompiledAggregate::Property {
            alias,
            method,
            expr,
        } => (alias, *method, expr),
    };
    let mut values = Vec::with_capacity(members.len());
    for row in members {
        let it = Value::Record(row.clone());
        let v = expr.eval(&Scope::root(&it, params))?;
        if !v.is_null() {
            values.push(v);
        }
    }
    let result = match method {
        AggregateMethod::Sum => sum(&values)?,
        AggregateMethod::Average => average(&values)?,
        AggregateMethod::Min => values.iter().min_by(|a, b| a.sort_cmp(b)).cloned().unwrap_or(Value::Null),
        AggregateMethod::Max => values.iter().max_by(|a, b| a.sort_cmp(b)).cloned().unwrap_or(Value::Null),
        AggregateMethod::CountDistinct => {
            let distinct: HashSet<String> = values.iter().map(Value::to_literal).collect();
            Value::Int(i64::try_from(distinct.len()).unwrap_or(i64::MAX))
        }
    };
    Ok((alias, result))
}

fn sum(values: &[Value]) -> Result<Value, ExecutionError> {
    let Some((first, rest)) = values.split_first() else {
        return Ok(Value::Null);
    };
    rest.iter()
        .try_fold(first.clone(), |acc, v| ops::arithmetic(BinaryOp::Add, &acc, v))
}

/// Decimal inputs average exactly; integers and doubles average as `Double`.
#[allow(clippy::cast_precision_loss)]
fn average(values: &[Value]) -> Result<Value, ExecutionError> {
    if values.is_empty() {
        return Ok(Value::Null);
    }
    let total = sum(values)?;
    let n = values.len();
    let exact = values.iter().any(|v| matches!(v, Value::Decimal(_)))
        && !values.iter().any(|v| matches!(v, Value::Double(_)));
    if exact {
        let total = total
            .as_decimal()
            .ok_or_else(|| ExecutionError::TypeError(format!("cannot average {}", total.kind_name())))?;
        return Ok(Value::Decimal(total / BigDecimal::from(u64::try_from(n).unwrap_or(u64::MAX))));
    }
    let total = total
        .as_f64()
        .ok_or_else(|| ExecutionError::TypeError(format!("cannot average {}", total.kind_name())))?;
    Ok(Value::Double(total / n as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn sums_and_averages_follow_input_kinds() {
        let ints = [Value::Int(1), Value::Int(2)];
        assert_eq!(sum(&ints).unwrap(), Value::Int(3));
        assert_eq!(average(&ints).unwrap(), Value::Double(1.5));

        let decimals = [
            Value::Decimal(BigDecimal::from_str("1.10").unwrap()),
            Value::Decimal(BigDecimal::from_str("2.20").unwrap()),
        ];
        assert_eq!(
            average(&decimals).unwrap(),
            Value::Decimal(BigDecimal::from_str("1.65").unwrap())
        );
        assert_eq!(sum(&[]).unwrap(), Value::Null);
        assert_eq!(average(&[]).unwrap(), Value::Null);
    }

    #[test]
    fn nested_keys_build_nested_records() {
        let mut r = Record::new("Ns.Sale@apply0");
        place(&mut r, "Ns.Sale@apply0", &["Product".into(), "Name".into()], Value::from("Pen"));
        place(&mut r, "Ns.Sale@apply0", &["Product".into(), "Color".into()], Value::from("Red"));
        let product = r.get("Product").and_then(Value::as_record).unwrap();
        assert_eq!(product.type_name(), "Ns.Sale@apply0/Product");
        assert_eq!(product.get("Name"), Some(&Value::from("Pen")));
        assert_eq!(product.get("Color"), Some(&Value::from("Red")));
    }
}
