//! Semantic binding: resolves a [`ParsedQuery`] against the model.

pub mod apply;
pub mod bound;
pub mod expr;
pub mod functions;
pub mod schema;
pub mod select_expand;

use std::collections::BTreeSet;
use std::sync::Arc;

use odata_edm::{EdmModel, TypeRef};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::BindError;
use crate::settings::QueryOption;
use crate::syntax::ParsedQuery;
use crate::syntax::ast::SearchExpr;
use bound::{Bound, BoundCompute, BoundOrderBy, BoundTransformation, Projection};
use expr::ExprBinder;
use functions::FunctionRegistry;
use schema::Schema;
use select_expand::{ProjectionBinder, key_ordering};

pub use bound::order_signature;
pub use select_expand::DEFAULT_MAX_LEVELS;

/// What the query targets: an entity set, or a bare structured type.
#[derive(Clone, Debug)]
pub struct BindTarget {
    pub entity_set: Option<Arc<str>>,
    pub element_type: Arc<str>,
}

impl BindTarget {
    /// Target the entity set `name`.
    ///
    /// # Errors
    /// Returns [`BindError::EntitySetNotFound`] when the container has no such set.
    pub fn entity_set(model: &EdmModel, name: &str) -> Result<Self, BindError> {
        let set = model
            .entity_set(name)
            .ok_or_else(|| BindError::EntitySetNotFound(name.to_owned()))?;
        Ok(Self {
            entity_set: Some(set.name.clone()),
            element_type: set.entity_type.clone(),
        })
    }

    /// Target a collection of `type_name` instances.
    ///
    /// # Errors
    /// Returns [`BindError::TypeNotFound`] when the model has no such structured type.
    pub fn element_type(model: &EdmModel, type_name: &str) -> Result<Self, BindError> {
        let t = model
            .structured_type(type_name)
            .ok_or_else(|| BindError::TypeNotFound(type_name.to_owned()))?;
        Ok(Self {
            entity_set: None,
            element_type: t.full_name.clone(),
        })
    }
}

/// A fully bound query, ready for validation and compilation.
#[derive(Clone, Debug)]
pub struct BoundQuery {
    pub schema: Arc<Schema>,
    pub entity_set: Option<Arc<str>>,
    /// Element type of the source collection.
    pub element_type: Arc<str>,
    /// Element type of the result after `$apply` and `$compute`.
    pub result_type: Arc<str>,
    pub apply: Vec<BoundTransformation>,
    pub compute: Vec<BoundCompute>,
    pub filter: Option<Bound>,
    pub search: Option<SearchExpr>,
    pub orderby: Vec<BoundOrderBy>,
    /// Ordering that makes the result total: keys, or group keys after `groupby`.
    pub stable_keys: Vec<BoundOrderBy>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
    pub count: bool,
    pub projection: Projection,
    pub skiptoken: Option<String>,
    pub custom: Vec<(String, String)>,
    pub present: BTreeSet<QueryOption>,
    /// Hash of everything that decides result membership; skiptokens carry it.
    pub filter_hash: Option<String>,
}

impl BoundQuery {
    /// Every bound expression tree: apply, compute, filter and ordering.
    #[must_use]
    pub fn expressions(&self) -> Vec<&Bound> {
        let mut out = Vec::new();
        for t in &self.apply {
            match t {
                BoundTransformation::Filter(e) => out.push(e),
                BoundTransformation::GroupBy {
                    keys, aggregates, ..
                } => {
                    out.extend(keys.iter().map(|k| &k.expr));
                    out.extend(aggregates.iter().filter_map(|a| match a {
                        bound::BoundAggregate::Property { expr, .. } => Some(expr),
                        bound::BoundAggregate::Count { .. } => None,
                    }));
                }
                BoundTransformation::Aggregate { aggregates, .. } => {
                    out.extend(aggregates.iter().filter_map(|a| match a {
                        bound::BoundAggregate::Property { expr, .. } => Some(expr),
                        bound::BoundAggregate::Count { .. } => None,
                    }));
                }
            }
        }
        out.extend(self.compute.iter().map(|c| &c.expr));
        out.extend(self.filter.as_ref());
        out.extend(self.orderby.iter().map(|o| &o.expr));
        out
    }
}

/// Short stable hash of the membership-deciding options; `None` when there are none.
#[must_use]
pub fn membership_hash(
    apply: &[BoundTransformation],
    compute: &[BoundCompute],
    filter: Option<&Bound>,
    search: Option<&SearchExpr>,
) -> Option<String> {
    if apply.is_empty() && compute.is_empty() && filter.is_none() && search.is_none() {
        return None;
    }
    let text: String = apply
        .iter()
        .map(|t| format!("a:{t};"))
        .chain(compute.iter().map(|c| format!("c:{} as {};", c.expr, c.alias)))
        .chain(filter.map(|f| format!("f:{f};")))
        .chain(search.map(|s| format!("s:{s};")))
        .collect();
    let digest = Sha256::digest(text.as_bytes());
    Some(hex::encode(&digest[..8]))
}

/// Resolve every option of `parsed` against the model.
///
/// # Errors
/// Returns the first [`BindError`] in evaluation order: `$apply`, `$compute`,
/// `$filter`, `$orderby`, then `$select`/`$expand`.
pub fn bind_query(
    parsed: &ParsedQuery,
    model: &Arc<EdmModel>,
    target: &BindTarget,
    functions: &FunctionRegistry,
    max_expansion_depth: Option<usize>,
) -> Result<BoundQuery, BindError> {
    let mut schema = Schema::new(model.clone());

    let outcome = apply::bind_apply(&mut schema, functions, &target.element_type, &parsed.apply)?;
    let (compute, result_type) =
        apply::bind_compute(&mut schema, functions, &outcome.element_type, &parsed.compute)?;
    let element = schema
        .structured(&result_type)
        .map(|t| t.type_ref())
        .ok_or_else(|| BindError::TypeNotFound(result_type.to_string()))?;

    let (filter, orderby) = {
        let mut binder = ExprBinder::new(&schema, functions, element.clone());
        let filter = match &parsed.filter {
            Some(e) => Some(binder.bind_predicate(e, "$filter")?),
            None => None,
        };
        let mut orderby = Vec::with_capacity(parsed.orderby.len());
        for item in &parsed.orderby {
            orderby.push(BoundOrderBy {
                expr: binder.bind_single_value(&item.expr, "$orderby")?,
                direction: item.direction,
            });
        }
        (filter, orderby)
    };

    let stable_keys = match &outcome.group_keys {
        Some(keys) => {
            let binder = ExprBinder::new(&schema, functions, element_type_ref(&schema, &outcome.element_type)?);
            keys.iter()
                .map(|k| group_key_ordering(&binder, &k.segments))
                .collect::<Result<Vec<_>, _>>()?
        }
        None => key_ordering(&schema, functions, &result_type)?,
    };

    let projection = ProjectionBinder {
        schema: &schema,
        functions,
        max_expansion_depth,
    }
    .bind(&result_type, parsed.select.as_deref(), &parsed.expand, 0)?;

    let filter_hash = membership_hash(
        &outcome.transformations,
        &compute,
        filter.as_ref(),
        parsed.search.as_ref(),
    );
    debug!(
        element_type = %target.element_type,
        result_type = %result_type,
        "bound query"
    );
    Ok(BoundQuery {
        schema: Arc::new(schema),
        entity_set: target.entity_set.clone(),
        element_type: target.element_type.clone(),
        result_type,
        apply: outcome.transformations,
        compute,
        filter,
        search: parsed.search.clone(),
        orderby,
        stable_keys,
        top: parsed.top,
        skip: parsed.skip,
        count: parsed.count.unwrap_or(false),
        projection,
        skiptoken: parsed.skiptoken.clone().filter(|t| !t.is_empty()),
        custom: parsed.custom.clone(),
        present: parsed.present.clone(),
        filter_hash,
    })
}

fn element_type_ref(schema: &Schema, name: &str) -> Result<TypeRef, BindError> {
    schema
        .structured(name)
        .map(|t| t.type_ref())
        .ok_or_else(|| BindError::TypeNotFound(name.to_owned()))
}

/// A group key re-bound as a path over the grouped result.
fn group_key_ordering(binder: &ExprBinder<'_>, segments: &[Arc<str>]) -> Result<BoundOrderBy, BindError> {
    let mut iter = segments.iter();
    let first = iter
        .next()
        .ok_or_else(|| BindError::Unsupported("empty groupby path".to_owned()))?;
    let mut expr = binder.segment_of_it(first)?;
    for seg in iter {
        expr = binder.segment(expr, seg)?;
    }
    Ok(BoundOrderBy {
        expr,
        direction: crate::syntax::ast::SortDir::Asc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ParserSettings;
    use crate::syntax::parse_query;
    use odata_edm::{
        EdmModelBuilder, EnumType, Operation, PrimitiveKind, Property, StructuredType, Value,
    };

    fn model() -> Arc<EdmModel> {
        let id = || TypeRef::primitive(PrimitiveKind::Int32).required();
        EdmModelBuilder::new("Default")
            .add_enum_type(
                EnumType::new("Ns", "Color")
                    .with_member("Red", 1)
                    .with_member("Green", 2)
                    .with_member("Blue", 4)
                    .flags(),
            )
            .add_structured_type(
                StructuredType::entity("Ns", "Customer")
                    .with_property(Property::structural("Id", id()))
                    .with_property(Property::structural("Name", TypeRef::string()))
                    .with_property(Property::structural("Age", TypeRef::int32()))
                    .with_property(Property::structural("Born", TypeRef::primitive(PrimitiveKind::DateTimeOffset)))
                    .with_property(Property::structural("Favorite", TypeRef::enumeration("Ns.Color")))
                    .with_property(Property::navigation(
                        "Orders",
                        TypeRef::collection(TypeRef::entity("Ns.Order")),
                    ))
                    .with_key("Id"),
            )
            .add_structured_type(
                StructuredType::entity("Ns", "Vip")
                    .with_base("Ns.Customer")
                    .with_property(Property::structural("Level", TypeRef::int32())),
            )
            .add_structured_type(
                StructuredType::entity("Ns", "Order")
                    .with_property(Property::structural("Id", id()))
                    .with_property(Property::structural("Total", TypeRef::primitive(PrimitiveKind::Decimal)))
                    .with_property(Property::navigation(
                        "Lines",
                        TypeRef::collection(TypeRef::entity("Ns.Line")),
                    ))
                    .with_key("Id"),
            )
            .add_structured_type(
                StructuredType::entity("Ns", "Line")
                    .with_property(Property::structural("Id", id()))
                    .with_property(Property::structural("Qty", TypeRef::int32()))
                    .with_key("Id"),
            )
            .add_operation(
                Operation::function("Ns", "Score")
                    .bound_to(TypeRef::entity("Ns.Customer"))
                    .returns(TypeRef::int32()),
            )
            .add_entity_set("Customers", "Ns.Customer")
            .build()
            .unwrap()
    }

    fn bind(query: &str) -> Result<BoundQuery, BindError> {
        bind_with(query, &FunctionRegistry::new())
    }

    fn bind_with(query: &str, functions: &FunctionRegistry) -> Result<BoundQuery, BindError> {
        let model = model();
        let parsed = parse_query(query, &ParserSettings::default()).unwrap();
        let target = BindTarget::entity_set(&model, "Customers").unwrap();
        bind_query(&parsed, &model, &target, functions, Some(2))
    }

    #[test]
    fn filter_binds_with_promotion() {
        let q = bind("$filter=Age add 1 gt 2.5").unwrap();
        let f = q.filter.unwrap();
        assert!(f.type_ref.unwrap().is_boolean());
        assert!(q.filter_hash.is_some());
    }

    #[test]
    fn unknown_property_is_reported() {
        let err = bind("$filter=Agee gt 1").unwrap_err();
        assert!(matches!(
            err,
            BindError::PropertyNotFound { property, suggestion: Some(s), .. }
                if property == "Agee" && s == "Age"
        ));
    }

    #[test]
    fn string_literal_compared_to_enum_becomes_member() {
        let q = bind("$filter=Favorite eq 'Blue'").unwrap();
        let mut found = false;
        q.filter.unwrap().walk(&mut |b| {
            if let bound::BoundKind::Constant(Value::Enum(e)) = &b.kind {
                found = e.value == 4;
            }
        });
        assert!(found);
        assert!(matches!(
            bind("$filter=Favorite eq 'Purple'"),
            Err(BindError::UnknownEnumMember { .. })
        ));
    }

    #[test]
    fn has_requires_enum() {
        assert!(bind("$filter=Favorite has Ns.Color'Red,Blue'").is_ok());
        assert!(matches!(
            bind("$filter=Age has Ns.Color'Red'"),
            Err(BindError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn mismatched_comparison_fails() {
        assert!(matches!(
            bind("$filter=Name eq 1"),
            Err(BindError::TypeMismatch { operator, .. }) if operator == "eq"
        ));
    }

    #[test]
    fn lambda_variables_scope_and_shadowing() {
        let q = bind("$filter=Orders/any(o:o/Lines/all(l:l/Qty gt 0 and o/Total gt 1))").unwrap();
        assert_eq!(q.filter.unwrap().lambda_depth(), 2);
        assert!(matches!(
            bind("$filter=Orders/any(o:o/Lines/any(o:o/Qty gt 0))"),
            Err(BindError::RangeVariableShadowed(v)) if v == "o"
        ));
    }

    #[test]
    fn lambda_variable_ends_with_its_lambda() {
        assert!(bind("$filter=Orders/any(o:o/Total gt 1) and Orders/all(o:o/Total lt 9)").is_ok());
        assert!(matches!(
            bind("$filter=Orders/any(o:o/Total gt 1) and o/Total gt 1"),
            Err(BindError::PropertyNotFound { property, .. }) if property == "o"
        ));
    }

    #[test]
    fn count_and_derived_cast() {
        assert!(bind("$filter=Orders/$count ge 2").is_ok());
        assert!(bind("$filter=Ns.Vip/Level gt 1").is_ok());
        assert!(matches!(
            bind("$filter=Ns.Order/Total gt 1"),
            Err(BindError::InvalidCast { .. })
        ));
        assert!(matches!(
            bind("$filter=Name/$count gt 1"),
            Err(BindError::ExpectedType { .. })
        ));
    }

    #[test]
    fn canonical_function_overloads() {
        assert!(bind("$filter=year(Born) eq 2000 and contains(Name,'a')").is_ok());
        assert!(matches!(
            bind("$filter=contains(Name)"),
            Err(BindError::FunctionNotFound { signature }) if signature == "contains(Edm.String)"
        ));
        assert!(matches!(bind("$filter=frobnicate(Name)"), Err(BindError::FunctionNotFound { .. })));
    }

    #[test]
    fn custom_function_needs_implementation() {
        assert!(matches!(bind("$filter=Ns.Score() gt 1"), Err(BindError::Unsupported(_))));
        let functions = FunctionRegistry::new().register("Ns.Score", |_| Ok(Value::Int(1)));
        let q = bind_with("$filter=Ns.Score() gt 1", &functions).unwrap();
        assert_eq!(q.filter.unwrap().to_string(), "Ns.Score($it) gt 1");
    }

    #[test]
    fn orderby_rejects_collections() {
        assert!(matches!(bind("$orderby=Orders"), Err(BindError::ExpectedType { .. })));
        let q = bind("$orderby=Name desc,Id").unwrap();
        assert_eq!(order_signature(&q.orderby), "-Name,+Id");
        assert_eq!(order_signature(&q.stable_keys), "+Id");
    }

    #[test]
    fn groupby_keys_become_stable_ordering() {
        let q = bind("$apply=groupby((Name),aggregate($count as N))&$orderby=N desc").unwrap();
        assert_eq!(order_signature(&q.stable_keys), "+Name");
        assert!(q.schema.is_synthesized(&q.result_type));
        assert!(matches!(
            bind("$apply=groupby((Name))&$filter=Age gt 1"),
            Err(BindError::PropertyNotFound { .. })
        ));
    }

    #[test]
    fn compute_alias_is_usable_downstream() {
        let q = bind("$compute=Age mul 2 as Twice&$filter=Twice gt 10&$select=Twice").unwrap();
        assert_eq!(q.compute.len(), 1);
        assert!(q.projection.properties.iter().any(|p| p.name.as_ref() == "Twice"));
    }

    #[test]
    fn hash_depends_on_membership_only() {
        let a = bind("$filter=Age gt 1&$top=5").unwrap();
        let b = bind("$filter=Age gt 1&$orderby=Name").unwrap();
        let c = bind("$filter=Age gt 2").unwrap();
        assert_eq!(a.filter_hash, b.filter_hash);
        assert_ne!(a.filter_hash, c.filter_hash);
        assert!(bind("$top=5").unwrap().filter_hash.is_none());
    }
}
