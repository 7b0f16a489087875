//! Typed trees produced by the binder.

use std::fmt;
use std::sync::Arc;

use odata_edm::{Property, TypeRef, Value};

use super::functions::BoundFunction;
use crate::syntax::ast::{AggregateMethod, BinaryOp, LambdaKind, Levels, SortDir, UnaryOp};

/// A bound expression node and its resolved type.
///
/// `type_ref` is `None` only for the `null` literal and for dynamic
/// properties of open types, whose type is known only at run time.
#[derive(Clone, Debug, PartialEq)]
pub struct Bound {
    pub kind: BoundKind,
    pub type_ref: Option<TypeRef>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BoundKind {
    Constant(Value),
    /// Literal lifted out of the tree; the value is supplied per execution.
    Parameter(usize),
    RangeVariable {
        name: String,
        slot: usize,
    },
    Property {
        source: Box<Bound>,
        property: Property,
        /// Canonical path, for messages.
        path: String,
    },
    DynamicProperty {
        source: Box<Bound>,
        name: String,
        path: String,
    },
    Count {
        source: Box<Bound>,
        /// Navigation or collection property being counted.
        property: Option<Property>,
        path: String,
    },
    Lambda {
        kind: LambdaKind,
        source: Box<Bound>,
        variable: String,
        slot: usize,
        body: Option<Box<Bound>>,
    },
    Call {
        function: BoundFunction,
        args: Vec<Bound>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Bound>,
        right: Box<Bound>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Bound>,
    },
    In {
        operand: Box<Bound>,
        list: Vec<Bound>,
    },
    IsOf {
        operand: Box<Bound>,
        target: TypeRef,
    },
    Cast {
        operand: Box<Bound>,
        target: TypeRef,
    },
}

impl Bound {
    #[must_use]
    pub const fn new(kind: BoundKind, type_ref: Option<TypeRef>) -> Self {
        Self { kind, type_ref }
    }

    #[must_use]
    pub fn constant(value: Value, type_ref: Option<TypeRef>) -> Self {
        Self::new(BoundKind::Constant(value), type_ref)
    }

    /// Direct children, in evaluation order.
    #[must_use]
    pub fn children(&self) -> Vec<&Bound> {
        match &self.kind {
            BoundKind::Constant(_) | BoundKind::Parameter(_) | BoundKind::RangeVariable { .. } => {
                Vec::new()
            }
            BoundKind::Property { source, .. }
            | BoundKind::DynamicProperty { source, .. }
            | BoundKind::Count { source, .. } => vec![source],
            BoundKind::Lambda { source, body, .. } => {
                let mut v = vec![&**source];
                v.extend(body.as_deref());
                v
            }
            BoundKind::Call { args, .. } => args.iter().collect(),
            BoundKind::Binary { left, right, .. } => vec![left, right],
            BoundKind::Unary { operand, .. }
            | BoundKind::IsOf { operand, .. }
            | BoundKind::Cast { operand, .. } => vec![operand],
            BoundKind::In { operand, list } => {
                let mut v = vec![&**operand];
                v.extend(list);
                v
            }
        }
    }

    /// Pre-order traversal.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Bound)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        let mut n = 0;
        self.walk(&mut |_| n += 1);
        n
    }

    /// Deepest nesting of `any`/`all` lambdas.
    #[must_use]
    pub fn lambda_depth(&self) -> usize {
        let own = usize::from(matches!(self.kind, BoundKind::Lambda { .. }));
        own + self
            .children()
            .into_iter()
            .map(Bound::lambda_depth)
            .max()
            .unwrap_or(0)
    }

    const fn needs_parens(&self) -> bool {
        matches!(
            self.kind,
            BoundKind::Binary { .. } | BoundKind::In { .. } | BoundKind::Unary { .. }
        )
    }
}

struct Operand<'a>(&'a Bound);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.needs_parens() {
            write!(f, "({})", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Bound]) -> fmt::Result {
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{a}")?;
    }
    Ok(())
}

/// Canonical query text; `@pN` marks a lifted parameter.
impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BoundKind::Constant(v) => f.write_str(&v.to_literal()),
            BoundKind::Parameter(i) => write!(f, "@p{i}"),
            BoundKind::RangeVariable { name, .. } => f.write_str(name),
            BoundKind::Property { path, .. }
            | BoundKind::DynamicProperty { path, .. } => f.write_str(path),
            BoundKind::Count { path, .. } => write!(f, "{path}/$count"),
            BoundKind::Lambda {
                kind,
                source,
                variable,
                body,
                ..
            } => match body {
                Some(b) => write!(f, "{source}/{}({variable}:{b})", kind.keyword()),
                None => write!(f, "{source}/{}()", kind.keyword()),
            },
            BoundKind::Call { function, args } => {
                write!(f, "{}(", function.name())?;
                write_args(f, args)?;
                f.write_str(")")
            }
            BoundKind::Binary { op, left, right } => {
                write!(f, "{} {} {}", Operand(left), op.keyword(), Operand(right))
            }
            BoundKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => write!(f, "not {}", Operand(operand)),
            BoundKind::Unary {
                op: UnaryOp::Negate,
                operand,
            } => write!(f, "-{}", Operand(operand)),
            BoundKind::In { operand, list } => {
                write!(f, "{} in (", Operand(operand))?;
                write_args(f, list)?;
                f.write_str(")")
            }
            BoundKind::IsOf { operand, target } => write!(f, "isof({operand},{target})"),
            BoundKind::Cast { operand, target } => write!(f, "cast({operand},{target})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BoundOrderBy {
    pub expr: Bound,
    pub direction: SortDir,
}

impl fmt::Display for BoundOrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.direction.sign(), self.expr)
    }
}

/// Signed signature of an ordering, e.g. `+Name,-Id`.
#[must_use]
pub fn order_signature(order: &[BoundOrderBy]) -> String {
    order
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Clone, Debug, PartialEq)]
pub enum BoundAggregate {
    Property {
        expr: Bound,
        method: AggregateMethod,
        alias: Arc<str>,
    },
    Count {
        alias: Arc<str>,
    },
}

impl BoundAggregate {
    #[must_use]
    pub fn alias(&self) -> &Arc<str> {
        match self {
            BoundAggregate::Property { alias, .. } | BoundAggregate::Count { alias } => alias,
        }
    }
}

impl fmt::Display for BoundAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundAggregate::Property {
                expr,
                method,
                alias,
            } => write!(f, "{expr} with {} as {alias}", method.keyword()),
            BoundAggregate::Count { alias } => write!(f, "$count as {alias}"),
        }
    }
}

/// One grouping property; `segments` is where the value lands in the output.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupKey {
    pub segments: Vec<Arc<str>>,
    pub expr: Bound,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BoundTransformation {
    Filter(Bound),
    GroupBy {
        keys: Vec<GroupKey>,
        aggregates: Vec<BoundAggregate>,
        result_type: Arc<str>,
    },
    Aggregate {
        aggregates: Vec<BoundAggregate>,
        result_type: Arc<str>,
    },
}

impl fmt::Display for BoundTransformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundTransformation::Filter(e) => write!(f, "filter({e})"),
            BoundTransformation::GroupBy {
                keys, aggregates, ..
            } => {
                let keys: Vec<_> = keys.iter().map(|k| k.expr.to_string()).collect();
                write!(f, "groupby(({})", keys.join(","))?;
                if !aggregates.is_empty() {
                    let aggs: Vec<_> = aggregates.iter().map(ToString::to_string).collect();
                    write!(f, ",aggregate({})", aggs.join(","))?;
                }
                f.write_str(")")
            }
            BoundTransformation::Aggregate { aggregates, .. } => {
                let aggs: Vec<_> = aggregates.iter().map(ToString::to_string).collect();
                write!(f, "aggregate({})", aggs.join(","))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BoundCompute {
    pub alias: Arc<str>,
    pub expr: Bound,
}

/// A selected property of a projected instance.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectedProperty {
    pub name: Arc<str>,
    /// `None` for dynamic properties of open types.
    pub property: Option<Property>,
    /// Only instances of this derived type carry the property.
    pub type_cast: Option<Arc<str>>,
    /// Sub-selection inside a complex property.
    pub nested: Option<Box<Projection>>,
    /// Added because it is a key or `AutoSelect`, not named by the client.
    pub auto: bool,
}

/// The projection applied to one structured type.
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    pub type_name: Arc<str>,
    /// No narrowing `$select`: every structural (and dynamic) property.
    pub all: bool,
    pub properties: Vec<SelectedProperty>,
    pub expansions: Vec<Expansion>,
}

impl Projection {
    #[must_use]
    pub fn all(type_name: Arc<str>) -> Self {
        Self {
            type_name,
            all: true,
            properties: Vec::new(),
            expansions: Vec::new(),
        }
    }

    /// Depth of the deepest client-requested expansion (auto expansions excluded).
    #[must_use]
    pub fn expansion_depth(&self) -> usize {
        let nested = self
            .properties
            .iter()
            .filter_map(|p| p.nested.as_deref())
            .map(Projection::expansion_depth);
        self.expansions
            .iter()
            .filter(|e| !e.auto)
            .map(|e| 1 + e.projection.expansion_depth())
            .chain(nested)
            .max()
            .unwrap_or(0)
    }
}

/// An expanded navigation property with its nested options.
#[derive(Clone, Debug, PartialEq)]
pub struct Expansion {
    pub name: Arc<str>,
    pub property: Property,
    pub path: String,
    pub type_cast: Option<Arc<str>>,
    pub target_type: Arc<str>,
    pub filter: Option<Bound>,
    pub orderby: Vec<BoundOrderBy>,
    /// Key ordering of the target type, for stable nested paging.
    pub stable_keys: Vec<BoundOrderBy>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
    pub count: bool,
    /// `PageSize` annotation on the navigation property.
    pub page_size: Option<usize>,
    pub levels: Option<Levels>,
    pub projection: Projection,
    /// Added by `AutoExpand` rather than requested.
    pub auto: bool,
}

impl Expansion {
    #[must_use]
    pub const fn is_collection(&self) -> bool {
        self.property.type_ref.is_collection()
    }
}
