//! Whole-query plans, constant parameterization and the shared plan cache.

use std::sync::Arc;

use dashmap::DashMap;
use odata_edm::Value;
use tracing::trace;

use super::{CompiledExpr, Compiler};
use crate::bind::BoundQuery;
use crate::bind::bound::{
    Bound, BoundAggregate, BoundKind, BoundOrderBy, BoundTransformation, Expansion, Projection,
};
use crate::bind::schema::Schema;
use crate::syntax::ast::{AggregateMethod, SortDir};

#[derive(Clone, Debug)]
pub struct CompiledOrder {
    pub expr: CompiledExpr,
    pub direction: SortDir,
}

#[derive(Clone, Debug)]
pub enum CompiledAggregate {
    Count {
        alias: Arc<str>,
    },
    Property {
        alias: Arc<str>,
        method: AggregateMethod,
        expr: CompiledExpr,
    },
}

#[derive(Clone, Debug)]
pub struct CompiledGroupKey {
    pub segments: Vec<Arc<str>>,
    pub expr: CompiledExpr,
}

#[derive(Clone, Debug)]
pub enum CompiledTransformation {
    Filter(CompiledExpr),
    GroupBy {
        keys: Vec<CompiledGroupKey>,
        aggregates: Vec<CompiledAggregate>,
        result_type: Arc<str>,
    },
    Aggregate {
        aggregates: Vec<CompiledAggregate>,
        result_type: Arc<str>,
    },
}

#[derive(Clone, Debug)]
pub struct CompiledSelection {
    pub name: Arc<str>,
    pub type_cast: Option<Arc<str>>,
    pub nested: Option<Box<CompiledProjection>>,
    pub auto: bool,
}

/// Projection of one structured level, ready to run.
#[derive(Clone, Debug)]
pub struct CompiledProjection {
    pub type_name: Arc<str>,
    pub all: bool,
    pub properties: Vec<CompiledSelection>,
    pub expansions: Vec<Arc<CompiledExpansion>>,
    pub schema: Arc<Schema>,
}

#[derive(Clone, Debug)]
pub struct CompiledExpansion {
    pub name: Arc<str>,
    pub type_cast: Option<Arc<str>>,
    pub collection: bool,
    pub filter: Option<CompiledExpr>,
    pub order: Vec<CompiledOrder>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
    pub count: bool,
    pub page_size: Option<usize>,
    pub projection: CompiledProjection,
    pub auto: bool,
}

/// Every compiled stage of one query shape.
#[derive(Clone, Debug)]
pub struct CompiledPlan {
    pub shape: String,
    pub apply: Vec<CompiledTransformation>,
    pub compute: Vec<(Arc<str>, CompiledExpr)>,
    pub filter: Option<CompiledExpr>,
    /// Effective ordering, stable tiebreakers included.
    pub order: Vec<CompiledOrder>,
    pub projection: CompiledProjection,
}

/// Concurrent cache of compiled plans keyed by query shape.
#[derive(Debug, Default)]
pub struct PlanCache {
    plans: DashMap<String, Arc<CompiledPlan>>,
}

impl PlanCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn clear(&self) {
        self.plans.clear();
    }

    /// Cached plan for `shape`, compiling it on first use. Concurrent first
    /// uses may compile twice; one result wins and both callers receive it.
    pub fn get_or_compile(&self, shape: &str, compile: impl FnOnce() -> CompiledPlan) -> Arc<CompiledPlan> {
        if let Some(plan) = self.plans.get(shape) {
            trace!(shape, "plan cache hit");
            return plan.value().clone();
        }
        let plan = Arc::new(compile());
        self.plans
            .entry(shape.to_owned())
            .or_insert(plan)
            .value()
            .clone()
    }
}

/// Ordering actually applied: `orderby` made total by the stable keys when
/// paging is in effect.
#[must_use]
pub fn effective_order(
    orderby: &[BoundOrderBy],
    stable_keys: &[BoundOrderBy],
    ensure_stable: bool,
    paged: bool,
) -> Vec<BoundOrderBy> {
    if !ensure_stable || !paged {
        return orderby.to_vec();
    }
    let mut order = orderby.to_vec();
    for key in stable_keys {
        let text = key.expr.to_string();
        if !order.iter().any(|o| o.expr.to_string() == text) {
            order.push(key.clone());
        }
    }
    order
}

/// Lifts literals into parameter slots, in traversal order.
#[derive(Debug, Default)]
pub struct Parameterizer {
    pub values: Vec<Value>,
}

impl Parameterizer {
    #[must_use]
    pub fn lift(&mut self, b: &Bound) -> Bound {
        let kind = match &b.kind {
            BoundKind::Constant(v) if !v.is_null() => {
                self.values.push(v.clone());
                BoundKind::Parameter(self.values.len() - 1)
            }
            BoundKind::Constant(_)
            | BoundKind::Parameter(_)
            | BoundKind::RangeVariable { .. } => b.kind.clone(),
            BoundKind::Property {
                source,
                property,
                path,
            } => BoundKind::Property {
                source: Box::new(self.lift(source)),
                property: property.clone(),
                path: path.clone(),
            },
            BoundKind::DynamicProperty { source, name, path } => BoundKind::DynamicProperty {
                source: Box::new(self.lift(source)),
                name: name.clone(),
                path: path.clone(),
            },
            BoundKind::Count {
                source,
                property,
                path,
            } => BoundKind::Count {
                source: Box::new(self.lift(source)),
                property: property.clone(),
                path: path.clone(),
            },
            BoundKind::Lambda {
                kind,
                source,
                variable,
                slot,
                body,
            } => BoundKind::Lambda {
                kind: *kind,
                source: Box::new(self.lift(source)),
                variable: variable.clone(),
                slot: *slot,
                body: body.as_deref().map(|b| Box::new(self.lift(b))),
            },
            BoundKind::Call { function, args } => BoundKind::Call {
                function: function.clone(),
                args: args.iter().map(|a| self.lift(a)).collect(),
            },
            BoundKind::Binary { op, left, right } => BoundKind::Binary {
                op: *op,
                left: Box::new(self.lift(left)),
                right: Box::new(self.lift(right)),
            },
            BoundKind::Unary { op, operand } => BoundKind::Unary {
                op: *op,
                operand: Box::new(self.lift(operand)),
            },
            BoundKind::In { operand, list } => BoundKind::In {
                operand: Box::new(self.lift(operand)),
                list: list.iter().map(|i| self.lift(i)).collect(),
            },
            BoundKind::IsOf { operand, target } => BoundKind::IsOf {
                operand: Box::new(self.lift(operand)),
                target: target.clone(),
            },
            BoundKind::Cast { operand, target } => BoundKind::Cast {
                operand: Box::new(self.lift(operand)),
                target: target.clone(),
            },
        };
        Bound::new(kind, b.type_ref.clone())
    }

    fn lift_order(&mut self, order: &[BoundOrderBy]) -> Vec<BoundOrderBy> {
        order
            .iter()
            .map(|o| BoundOrderBy {
                expr: self.lift(&o.expr),
                direction: o.direction,
            })
            .collect()
    }

    fn lift_aggregates(&mut self, aggregates: &[BoundAggregate]) -> Vec<BoundAggregate> {
        aggregates
            .iter()
            .map(|a| match a {
                BoundAggregate::Property {
                    expr,
                    method,
                    alias,
                } => BoundAggregate::Property {
                    expr: self.lift(expr),
                    method: *method,
                    alias: alias.clone(),
                },
                BoundAggregate::Count { .. } => a.clone(),
            })
            .collect()
    }

    fn lift_projection(&mut self, p: &Projection) -> Projection {
        let mut p = p.clone();
        for e in &mut p.expansions {
            e.filter = e.filter.as_ref().map(|f| self.lift(f));
            e.orderby = self.lift_order(&e.orderby);
            e.projection = self.lift_projection(&e.projection);
        }
        p
    }
}

/// The parts of a query a plan is compiled from.
#[derive(Clone, Debug)]
pub struct PlanInput {
    pub apply: Vec<BoundTransformation>,
    pub compute: Vec<(Arc<str>, Bound)>,
    pub filter: Option<Bound>,
    pub order: Vec<BoundOrderBy>,
    pub projection: Projection,
}

impl PlanInput {
    /// Collect the plan input of `query`, lifting literals when `parameterize` is set.
    #[must_use]
    pub fn from_query(
        query: &BoundQuery,
        order: Vec<BoundOrderBy>,
        parameterize: bool,
    ) -> (Self, Vec<Value>) {
        let input = Self {
            apply: query.apply.clone(),
            compute: query
                .compute
                .iter()
                .map(|c| (c.alias.clone(), c.expr.clone()))
                .collect(),
            filter: query.filter.clone(),
            order,
            projection: query.projection.clone(),
        };
        if !parameterize {
            return (input, Vec::new());
        }
        let mut p = Parameterizer::default();
        let apply = input
            .apply
            .iter()
            .map(|t| match t {
                BoundTransformation::Filter(e) => BoundTransformation::Filter(p.lift(e)),
                BoundTransformation::GroupBy {
                    keys,
                    aggregates,
                    result_type,
                } => BoundTransformation::GroupBy {
                    keys: keys
                        .iter()
                        .map(|k| crate::bind::bound::GroupKey {
                            segments: k.segments.clone(),
                            expr: p.lift(&k.expr),
                        })
                        .collect(),
                    aggregates: p.lift_aggregates(aggregates),
                    result_type: result_type.clone(),
                },
                BoundTransformation::Aggregate {
                    aggregates,
                    result_type,
                } => BoundTransformation::Aggregate {
                    aggregates: p.lift_aggregates(aggregates),
                    result_type: result_type.clone(),
                },
            })
            .collect();
        let compute = input
            .compute
            .iter()
            .map(|(a, e)| (a.clone(), p.lift(e)))
            .collect();
        let filter = input.filter.as_ref().map(|f| p.lift(f));
        let order = p.lift_order(&input.order);
        let projection = p.lift_projection(&input.projection);
        (
            Self {
                apply,
                compute,
                filter,
                order,
                projection,
            },
            p.values,
        )
    }

    /// Cache key: canonical text of every stage plus the flags compilation depends on.
    #[must_use]
    pub fn shape(&self, query: &BoundQuery, propagate: bool, ensure_stable: bool) -> String {
        let head = format!(
            "{}|{}|n{}|s{}",
            query.element_type,
            query.result_type,
            u8::from(propagate),
            u8::from(ensure_stable)
        );
        std::iter::once(head)
            .chain(self.apply.iter().map(|t| format!("a:{t}")))
            .chain(self.compute.iter().map(|(alias, e)| format!("c:{e} as {alias}")))
            .chain(self.filter.iter().map(|f| format!("f:{f}")))
            .chain(self.order.iter().map(|o| format!("o:{o}")))
            .chain(std::iter::once(format!("p:{:?}", self.projection)))
            .collect::<Vec<_>>()
            .join("|")
    }

    #[must_use]
    pub fn compile(&self, compiler: &Compiler, shape: String, ensure_stable: bool) -> CompiledPlan {
        CompiledPlan {
            shape,
            apply: self.apply.iter().map(|t| compile_transformation(compiler, t)).collect(),
            compute: self
                .compute
                .iter()
                .map(|(a, e)| (a.clone(), compiler.compile(e)))
                .collect(),
            filter: self.filter.as_ref().map(|f| compiler.compile(f)),
            order: compile_order(compiler, &self.order),
            projection: compile_projection(compiler, &self.projection, ensure_stable),
        }
    }
}

fn compile_order(compiler: &Compiler, order: &[BoundOrderBy]) -> Vec<CompiledOrder> {
    order
        .iter()
        .map(|o| CompiledOrder {
            expr: compiler.compile(&o.expr),
            direction: o.direction,
        })
        .collect()
}

fn compile_aggregates(compiler: &Compiler, aggregates: &[BoundAggregate]) -> Vec<CompiledAggregate> {
    aggregates
        .iter()
        .map(|a| match a {
            BoundAggregate::Count { alias } => CompiledAggregate::Count {
                alias: alias.clone(),
            },
            BoundAggregate::Property {
                expr,
                method,
                alias,
            } => CompiledAggregate::Property {
                alias: alias.clone(),
                method: *method,
                expr: compiler.compile(expr),
            },
        })
        .collect()
}

fn compile_transformation(compiler: &Compiler, t: &BoundTransformation) -> CompiledTransformation {
    match t {
        BoundTransformation::Filter(e) => CompiledTransformation::Filter(compiler.compile(e)),
        BoundTransformation::GroupBy {
            keys,
            aggregates,
            result_type,
        } => CompiledTransformation::GroupBy {
            keys: keys
                .iter()
                .map(|k| CompiledGroupKey {
                    segments: k.segments.clone(),
                    expr: compiler.compile(&k.expr),
                })
                .collect(),
            aggregates: compile_aggregates(compiler, aggregates),
            result_type: result_type.clone(),
        },
        BoundTransformation::Aggregate {
            aggregates,
            result_type,
        } => CompiledTransformation::Aggregate {
            aggregates: compile_aggregates(compiler, aggregates),
            result_type: result_type.clone(),
        },
    }
}

fn compile_projection(
    compiler: &Compiler,
    p: &Projection,
    ensure_stable: bool,
) -> CompiledProjection {
    CompiledProjection {
        type_name: p.type_name.clone(),
        all: p.all,
        properties: p
            .properties
            .iter()
            .map(|s| CompiledSelection {
                name: s.name.clone(),
                type_cast: s.type_cast.clone(),
                nested: s
                    .nested
                    .as_deref()
                    .map(|n| Box::new(compile_projection(compiler, n, ensure_stable))),
                auto: s.auto,
            })
            .collect(),
        expansions: p
            .expansions
            .iter()
            .map(|e| Arc::new(compile_expansion(compiler, e, ensure_stable)))
            .collect(),
        schema: compiler.schema().clone(),
    }
}

fn compile_expansion(compiler: &Compiler, e: &Expansion, ensure_stable: bool) -> CompiledExpansion {
    let paged = e.top.is_some() || e.skip.is_some() || e.page_size.is_some();
    let order = effective_order(&e.orderby, &e.stable_keys, ensure_stable, paged);
    CompiledExpansion {
        name: e.name.clone(),
        type_cast: e.type_cast.clone(),
        collection: e.is_collection(),
        filter: e.filter.as_ref().map(|f| compiler.compile(f)),
        order: compile_order(compiler, &order),
        top: e.top,
        skip: e.skip,
        count: e.count,
        page_size: e.page_size,
        projection: compile_projection(compiler, &e.projection, ensure_stable),
        auto: e.auto,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::functions::FunctionRegistry;
    use crate::bind::{BindTarget, bind_query};
    use crate::settings::ParserSettings;
    use crate::syntax::parse_query;
    use odata_edm::{EdmModel, EdmModelBuilder, PrimitiveKind, Property, StructuredType, TypeRef};

    fn model() -> Arc<EdmModel> {
        EdmModelBuilder::new("Default")
            .add_structured_type(
                StructuredType::entity("Ns", "Item")
                    .with_property(Property::structural(
                        "Id",
                        TypeRef::primitive(PrimitiveKind::Int32).required(),
                    ))
                    .with_property(Property::structural("Name", TypeRef::string()))
                    .with_key("Id"),
            )
            .add_entity_set("Items", "Ns.Item")
            .build()
            .unwrap()
    }

    fn bound(query: &str) -> BoundQuery {
        let model = model();
        let parsed = parse_query(query, &ParserSettings::default()).unwrap();
        let target = BindTarget::entity_set(&model, "Items").unwrap();
        bind_query(&parsed, &model, &target, &FunctionRegistry::new(), None).unwrap()
    }

    #[test]
    fn literals_share_a_shape() {
        let a = bound("$filter=Id gt 1 and Name ne null");
        let b = bound("$filter=Id gt 5 and Name ne null");
        let (ia, pa) = PlanInput::from_query(&a, a.orderby.clone(), true);
        let (ib, pb) = PlanInput::from_query(&b, b.orderby.clone(), true);
        assert_eq!(ia.shape(&a, true, true), ib.shape(&b, true, true));
        assert_eq!(pa, vec![Value::Int(1)]);
        assert_eq!(pb, vec![Value::Int(5)]);
        assert_ne!(ia.shape(&a, true, true), ia.shape(&a, false, true));

        let (raw, none) = PlanInput::from_query(&a, Vec::new(), false);
        assert!(none.is_empty());
        assert_eq!(raw.filter.unwrap().to_string(), "(Id gt 1) and (Name ne null)");
    }

    #[test]
    fn cache_compiles_once_per_shape() {
        let cache = PlanCache::new();
        let q = bound("$filter=Id gt 1");
        let (input, _) = PlanInput::from_query(&q, Vec::new(), true);
        let compiler = Compiler::new(q.schema.clone(), true);
        let shape = input.shape(&q, true, true);
        let mut compiled = 0;
        for _ in 0..3 {
            cache.get_or_compile(&shape, || {
                compiled += 1;
                input.compile(&compiler, shape.clone(), true)
            });
        }
        assert_eq!(compiled, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn stable_keys_appended_only_when_paged() {
        let q = bound("$orderby=Name");
        assert_eq!(effective_order(&q.orderby, &q.stable_keys, true, false).len(), 1);
        let paged = effective_order(&q.orderby, &q.stable_keys, true, true);
        assert_eq!(crate::bind::order_signature(&paged), "+Name,+Id");
        let keyed = bound("$orderby=Id desc");
        let paged = effective_order(&keyed.orderby, &keyed.stable_keys, true, true);
        assert_eq!(crate::bind::order_signature(&paged), "-Id");
    }
}
