//! `$compute` and `$apply` binding. Both synthesize the element type the
//! remaining options see.

use std::sync::Arc;

use odata_edm::{PrimitiveKind, Property, StructuredType, TypeKind, TypeRef};

use super::bound::{BoundAggregate, BoundCompute, BoundTransformation, GroupKey};
use super::expr::ExprBinder;
use super::functions::FunctionRegistry;
use super::schema::Schema;
use crate::error::BindError;
use crate::syntax::ast::{Aggregate, AggregateMethod, ComputeItem, Expr, Transformation};

/// Element type after a transformation, and the grouping that produced it.
#[derive(Debug)]
pub(crate) struct ApplyOutcome {
    pub transformations: Vec<BoundTransformation>,
    pub element_type: Arc<str>,
    /// Grouping keys of the last `groupby`; empty after a plain `aggregate`.
    pub group_keys: Option<Vec<GroupKey>>,
}

fn element_ref(schema: &Schema, type_name: &str) -> Result<TypeRef, BindError> {
    schema
        .structured(type_name)
        .map(|t| t.type_ref())
        .ok_or_else(|| BindError::TypeNotFound(type_name.to_owned()))
}

/// Bind `$compute` and register the widened element type.
pub(crate) fn bind_compute(
    schema: &mut Schema,
    functions: &FunctionRegistry,
    element_type: &Arc<str>,
    items: &[ComputeItem],
) -> Result<(Vec<BoundCompute>, Arc<str>), BindError> {
    if items.is_empty() {
        return Ok((Vec::new(), element_type.clone()));
    }
    let base = schema
        .structured(element_type)
        .ok_or_else(|| BindError::TypeNotFound(element_type.to_string()))?;
    let mut bound = Vec::with_capacity(items.len());
    let mut properties = Vec::with_capacity(items.len());
    {
        let mut binder = ExprBinder::new(schema, functions, base.type_ref());
        for item in items {
            let alias: Arc<str> = Arc::from(item.alias.as_str());
            if schema.find_property(element_type, &alias).is_some()
                || bound.iter().any(|c: &BoundCompute| c.alias == alias)
            {
                return Err(BindError::DuplicateAlias(item.alias.clone()));
            }
            let expr = binder.bind_single_value(&item.expr, &format!("$compute alias `{alias}`"))?;
            let Some(type_ref) = expr.type_ref.clone() else {
                return Err(BindError::ExpectedType {
                    context: format!("$compute alias `{alias}`"),
                    expected: "a typed expression".to_owned(),
                    found: "null".to_owned(),
                });
            };
            properties.push(Property::structural(alias.clone(), type_ref.with_nullable(true)));
            bound.push(BoundCompute { alias, expr });
        }
    }
    let widened = schema.add_compute_type(&base, properties);
    Ok((bound, widened))
}

/// Result type of an aggregation method over `input`.
fn aggregate_type(method: AggregateMethod, input: Option<&TypeRef>, alias: &str) -> Result<TypeRef, BindError> {
    let kind = input.and_then(TypeRef::as_primitive);
    let numeric = |k: Option<PrimitiveKind>| {
        if input.is_none() {
            return Ok(());
        }
        match k {
            Some(k) if k.is_numeric() => Ok(()),
            _ => Err(BindError::ExpectedType {
                context: format!("aggregate `{alias}`"),
                expected: "a numeric value".to_owned(),
                found: input.map_or_else(|| "null".to_owned(), ToString::to_string),
            }),
        }
    };
    let t = match method {
        AggregateMethod::Sum => {
            numeric(kind)?;
            match kind {
                Some(k) if k.is_integral() => PrimitiveKind::Int64,
                Some(PrimitiveKind::Single | PrimitiveKind::Double) => PrimitiveKind::Double,
                _ => PrimitiveKind::Decimal,
            }
        }
        AggregateMethod::Average => {
            numeric(kind)?;
            match kind {
                Some(PrimitiveKind::Decimal) | None => PrimitiveKind::Decimal,
                _ => PrimitiveKind::Double,
            }
        }
        AggregateMethod::Min | AggregateMethod::Max => match input {
            Some(t) if matches!(t.kind, TypeKind::Primitive(_) | TypeKind::Enum(_)) => {
                return Ok(t.clone().with_nullable(true));
            }
            Some(t) => {
                return Err(BindError::ExpectedType {
                    context: format!("aggregate `{alias}`"),
                    expected: "a single primitive value".to_owned(),
                    found: t.to_string(),
                });
            }
            None => PrimitiveKind::Decimal,
        },
        AggregateMethod::CountDistinct => PrimitiveKind::Int64,
    };
    Ok(TypeRef::primitive(t))
}

fn bind_aggregates(
    binder: &mut ExprBinder<'_>,
    aggregates: &[Aggregate],
    taken: &mut Vec<Arc<str>>,
) -> Result<(Vec<BoundAggregate>, Vec<Property>), BindError> {
    let mut bound = Vec::with_capacity(aggregates.len());
    let mut properties = Vec::with_capacity(aggregates.len());
    for agg in aggregates {
        let alias: Arc<str> = Arc::from(agg.alias());
        if taken.contains(&alias) {
            return Err(BindError::DuplicateAlias(alias.to_string()));
        }
        taken.push(alias.clone());
        match agg {
            Aggregate::Count { .. } => {
                properties.push(Property::structural(
                    alias.clone(),
                    TypeRef::primitive(PrimitiveKind::Int64).required(),
                ));
                bound.push(BoundAggregate::Count { alias });
            }
            Aggregate::Property { expr, method, .. } => {
                let expr = binder.bind_single_value(expr, &format!("aggregate `{alias}`"))?;
                let type_ref = aggregate_type(*method, expr.type_ref.as_ref(), &alias)?;
                properties.push(Property::structural(alias.clone(), type_ref));
                bound.push(BoundAggregate::Property {
                    expr,
                    method: *method,
                    alias,
                });
            }
        }
    }
    Ok((bound, properties))
}

/// Grouping tree: leaves are key values, branches nested result objects.
enum Node {
    Leaf(TypeRef),
    Branch(Vec<(Arc<str>, Node)>),
}

fn insert(children: &mut Vec<(Arc<str>, Node)>, segments: &[Arc<str>], leaf: TypeRef) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        if !children.iter().any(|(n, _)| n == first) {
            children.push((first.clone(), Node::Leaf(leaf)));
        }
        return;
    }
    let idx = match children.iter().position(|(n, _)| n == first) {
        Some(i) => i,
        None => {
            children.push((first.clone(), Node::Branch(Vec::new())));
            children.len() - 1
        }
    };
    if let Node::Branch(inner) = &mut children[idx].1 {
        insert(inner, rest, leaf);
    }
}

fn materialize(
    schema: &mut Schema,
    namespace: &str,
    full_name: &str,
    children: Vec<(Arc<str>, Node)>,
    extra: Vec<Property>,
    entity: bool,
) -> Arc<str> {
    let mut t = if entity {
        StructuredType::entity(namespace, full_name)
    } else {
        StructuredType::complex(namespace, full_name)
    };
    t.full_name = Arc::from(full_name);
    for (name, node) in children {
        let type_ref = match node {
            Node::Leaf(tr) => tr,
            Node::Branch(inner) => {
                let nested = format!("{full_name}/{name}");
                let nested = materialize(schema, namespace, &nested, inner, Vec::new(), false);
                TypeRef::complex(nested)
            }
        };
        t.properties.push(Property::structural(name, type_ref));
    }
    t.properties.extend(extra);
    schema.add_result_type(t)
}

/// Bind the `$apply` pipeline starting from `element_type`.
pub(crate) fn bind_apply(
    schema: &mut Schema,
    functions: &FunctionRegistry,
    element_type: &Arc<str>,
    transformations: &[Transformation],
) -> Result<ApplyOutcome, BindError> {
    let mut current = element_type.clone();
    let mut bound = Vec::with_capacity(transformations.len());
    let mut group_keys = None;
    for t in transformations {
        let input = element_ref(schema, &current)?;
        let namespace = schema
            .structured(&current)
            .map_or_else(|| Arc::from(""), |s| s.namespace.clone());
        match t {
            Transformation::Filter(e) => {
                let mut binder = ExprBinder::new(schema, functions, input);
                bound.push(BoundTransformation::Filter(
                    binder.bind_predicate(e, "$apply filter")?,
                ));
            }
            Transformation::GroupBy { paths, aggregates } => {
                let (keys, aggs, props, tree) = {
                    let mut binder = ExprBinder::new(schema, functions, input);
                    let mut keys = Vec::with_capacity(paths.len());
                    let mut tree = Vec::new();
                    let mut taken: Vec<Arc<str>> = Vec::new();
                    for path in paths {
                        let expr = path
                            .iter()
                            .fold(None, |parent: Option<Expr>, seg| {
                                Some(Expr::Member {
                                    parent: parent.map(Box::new),
                                    name: seg.clone(),
                                })
                            })
                            .ok_or_else(|| BindError::Unsupported("empty groupby path".to_owned()))?;
                        let expr = binder.bind_single_value(&expr, "groupby")?;
                        let segments: Vec<Arc<str>> =
                            path.iter().map(|s| Arc::from(s.as_str())).collect();
                        let leaf = expr
                            .type_ref
                            .clone()
                            .unwrap_or_else(|| TypeRef::primitive(PrimitiveKind::String));
                        insert(&mut tree, &segments, leaf);
                        if let Some(first) = segments.first() {
                            taken.push(first.clone());
                        }
                        keys.push(GroupKey { segments, expr });
                    }
                    let (aggs, props) = bind_aggregates(&mut binder, aggregates, &mut taken)?;
                    (keys, aggs, props, tree)
                };
                let name = schema.next_result_name(&current);
                let result_type = materialize(schema, &namespace, &name, tree, props, true);
                current = result_type.clone();
                group_keys = Some(keys.clone());
                bound.push(BoundTransformation::GroupBy {
                    keys,
                    aggregates: aggs,
                    result_type,
                });
            }
            Transformation::Aggregate(aggregates) => {
                let (aggs, props) = {
                    let mut binder = ExprBinder::new(schema, functions, input);
                    bind_aggregates(&mut binder, aggregates, &mut Vec::new())?
                };
                let name = schema.next_result_name(&current);
                let result_type = materialize(schema, &namespace, &name, Vec::new(), props, false);
                current = result_type.clone();
                group_keys = Some(Vec::new());
                bound.push(BoundTransformation::Aggregate {
                    aggregates: aggs,
                    result_type,
                });
            }
        }
    }
    Ok(ApplyOutcome {
        transformations: bound,
        element_type: current,
        group_keys,
    })
}
