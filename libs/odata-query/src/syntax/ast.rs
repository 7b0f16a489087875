//! Unbound syntax trees for every query option.
//!
//! Nodes carry no types. Every tree renders back to canonical query text via
//! `Display`; re-parsing that text yields an equal tree.

use std::fmt;

use odata_edm::Value;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Has,
    Add,
    Sub,
    Mul,
    Div,
    DivBy,
    Mod,
}

impl BinaryOp {
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Has => "has",
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::DivBy => "divby",
            BinaryOp::Mod => "mod",
        }
    }

    #[must_use]
    pub const fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le
        )
    }

    #[must_use]
    pub const fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::Mul
                | BinaryOp::Div
                | BinaryOp::DivBy
                | BinaryOp::Mod
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LambdaKind {
    Any,
    All,
}

impl LambdaKind {
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            LambdaKind::Any => "any",
            LambdaKind::All => "all",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeCheckKind {
    Cast,
    IsOf,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// `Ns.Color'Red'`, resolved against the model while binding.
    EnumLiteral { type_name: String, member: String },
    /// One path segment; `parent` is `None` at the start of a path.
    Member {
        parent: Option<Box<Expr>>,
        name: String,
    },
    /// `path/$count`.
    Count(Box<Expr>),
    Lambda {
        kind: LambdaKind,
        source: Box<Expr>,
        variable: Option<String>,
        body: Option<Box<Expr>>,
    },
    /// `$it` / `$this`.
    RangeVariable(String),
    /// Canonical or namespace-qualified function; `parent` holds the path a
    /// bound function is invoked on.
    Call {
        parent: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    In {
        operand: Box<Expr>,
        list: Vec<Expr>,
    },
    TypeCheck {
        kind: TypeCheckKind,
        operand: Option<Box<Expr>>,
        type_name: String,
    },
}

impl Expr {
    #[must_use]
    pub fn member(name: impl Into<String>) -> Self {
        Expr::Member {
            parent: None,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Number of nodes in the tree.
    #[must_use]
    pub fn node_count(&self) -> usize {
        1 + match self {
            Expr::Literal(_) | Expr::EnumLiteral { .. } | Expr::RangeVariable(_) => 0,
            Expr::Member { parent, .. } => parent.as_ref().map_or(0, |p| p.node_count()),
            Expr::Count(source) => source.node_count(),
            Expr::Lambda { source, body, .. } => {
                source.node_count() + body.as_ref().map_or(0, |b| b.node_count())
            }
            Expr::Call { parent, args, .. } => {
                parent.as_ref().map_or(0, |p| p.node_count())
                    + args.iter().map(Expr::node_count).sum::<usize>()
            }
            Expr::Binary { left, right, .. } => left.node_count() + right.node_count(),
            Expr::Unary { operand, .. } => operand.node_count(),
            Expr::In { operand, list } => {
                operand.node_count() + list.iter().map(Expr::node_count).sum::<usize>()
            }
            Expr::TypeCheck { operand, .. } => operand.as_ref().map_or(0, |o| o.node_count()),
        }
    }

    const fn needs_parens(&self) -> bool {
        matches!(self, Expr::Binary { .. } | Expr::In { .. } | Expr::Unary { .. })
    }
}

struct Operand<'a>(&'a Expr);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.needs_parens() {
            write!(f, "({})", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{}", v.to_literal()),
            Expr::EnumLiteral { type_name, member } => {
                write!(f, "{type_name}'{}'", member.replace('\'', "''"))
            }
            Expr::Member { parent, name } => match parent {
                Some(p) => write!(f, "{p}/{name}"),
                None => f.write_str(name),
            },
            Expr::Count(source) => write!(f, "{source}/$count"),
            Expr::Lambda {
                kind,
                source,
                variable,
                body,
            } => match (variable, body) {
                (Some(v), Some(b)) => write!(f, "{source}/{}({v}:{b})", kind.keyword()),
                _ => write!(f, "{source}/{}()", kind.keyword()),
            },
            Expr::RangeVariable(name) => f.write_str(name),
            Expr::Call { parent, name, args } => {
                if let Some(p) = parent {
                    write!(f, "{p}/")?;
                }
                write!(f, "{name}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Binary { op, left, right } => {
                write!(f, "{} {} {}", Operand(left), op.keyword(), Operand(right))
            }
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => write!(f, "not {}", Operand(operand)),
            Expr::Unary {
                op: UnaryOp::Negate,
                operand,
            } => write!(f, "-{}", Operand(operand)),
            Expr::In { operand, list } => {
                write!(f, "{} in (", Operand(operand))?;
                write_list(f, list)?;
                f.write_str(")")
            }
            Expr::TypeCheck {
                kind,
                operand,
                type_name,
            } => {
                let name = match kind {
                    TypeCheckKind::Cast => "cast",
                    TypeCheckKind::IsOf => "isof",
                };
                match operand {
                    Some(o) => write!(f, "{name}({o},{type_name})"),
                    None => write!(f, "{name}({type_name})"),
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDir {
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
}

impl SortDir {
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            SortDir::Asc => SortDir::Desc,
            SortDir::Desc => SortDir::Asc,
        }
    }

    #[must_use]
    pub const fn sign(self) -> char {
        match self {
            SortDir::Asc => '+',
            SortDir::Desc => '-',
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderByItem {
    pub expr: Expr,
    pub direction: SortDir,
}

impl fmt::Display for OrderByItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            SortDir::Asc => write!(f, "{}", self.expr),
            SortDir::Desc => write!(f, "{} desc", self.expr),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    /// Slash-separated segments; a segment containing a dot is a type cast.
    Path(Vec<String>),
}

impl fmt::Display for SelectItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectItem::Wildcard => f.write_str("*"),
            SelectItem::Path(segments) => f.write_str(&segments.join("/")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Levels {
    Max,
    Count(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpandPath {
    /// `*`: every navigation property.
    All,
    Path(Vec<String>),
}

/// Options nested inside an expanded navigation: `Orders($filter=...;$top=2)`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NestedOptions {
    pub filter: Option<Expr>,
    pub orderby: Vec<OrderByItem>,
    pub select: Option<Vec<SelectItem>>,
    pub expand: Vec<ExpandItem>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
    pub count: Option<bool>,
    pub levels: Option<Levels>,
}

impl NestedOptions {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == NestedOptions::default()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExpandItem {
    pub path: ExpandPath,
    pub options: NestedOptions,
}

impl fmt::Display for ExpandItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            ExpandPath::All => f.write_str("*")?,
            ExpandPath::Path(p) => f.write_str(&p.join("/"))?,
        }
        if self.options.is_empty() {
            return Ok(());
        }
        let o = &self.options;
        let mut parts = Vec::new();
        if let Some(e) = &o.filter {
            parts.push(format!("$filter={e}"));
        }
        if !o.orderby.is_empty() {
            parts.push(format!("$orderby={}", join(&o.orderby)));
        }
        if let Some(s) = &o.select {
            parts.push(format!("$select={}", join(s)));
        }
        if !o.expand.is_empty() {
            parts.push(format!("$expand={}", join(&o.expand)));
        }
        if let Some(n) = o.top {
            parts.push(format!("$top={n}"));
        }
        if let Some(n) = o.skip {
            parts.push(format!("$skip={n}"));
        }
        if let Some(c) = o.count {
            parts.push(format!("$count={c}"));
        }
        match o.levels {
            Some(Levels::Max) => parts.push("$levels=max".to_owned()),
            Some(Levels::Count(n)) => parts.push(format!("$levels={n}")),
            None => {}
        }
        write!(f, "({})", parts.join(";"))
    }
}

pub(crate) fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregateMethod {
    Sum,
    Min,
    Max,
    Average,
    CountDistinct,
}

impl AggregateMethod {
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            AggregateMethod::Sum => "sum",
            AggregateMethod::Min => "min",
            AggregateMethod::Max => "max",
            AggregateMethod::Average => "average",
            AggregateMethod::CountDistinct => "countdistinct",
        }
    }

    #[must_use]
    pub fn from_keyword(s: &str) -> Option<Self> {
        [
            AggregateMethod::Sum,
            AggregateMethod::Min,
            AggregateMethod::Max,
            AggregateMethod::Average,
            AggregateMethod::CountDistinct,
        ]
        .into_iter()
        .find(|m| m.keyword() == s)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Aggregate {
    /// `expr with method as Alias`
    Property {
        expr: Expr,
        method: AggregateMethod,
        alias: String,
    },
    /// `$count as Alias`
    Count { alias: String },
}

impl Aggregate {
    #[must_use]
    pub fn alias(&self) -> &str {
        match self {
            Aggregate::Property { alias, .. } | Aggregate::Count { alias } => alias,
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Property {
                expr,
                method,
                alias,
            } => write!(f, "{expr} with {} as {alias}", method.keyword()),
            Aggregate::Count { alias } => write!(f, "$count as {alias}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Transformation {
    Filter(Expr),
    GroupBy {
        paths: Vec<Vec<String>>,
        aggregates: Vec<Aggregate>,
    },
    Aggregate(Vec<Aggregate>),
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transformation::Filter(e) => write!(f, "filter({e})"),
            Transformation::GroupBy { paths, aggregates } => {
                let paths: Vec<_> = paths.iter().map(|p| p.join("/")).collect();
                write!(f, "groupby(({})", paths.join(","))?;
                if !aggregates.is_empty() {
                    write!(f, ",aggregate({})", join(aggregates))?;
                }
                f.write_str(")")
            }
            Transformation::Aggregate(aggs) => write!(f, "aggregate({})", join(aggs)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ComputeItem {
    pub expr: Expr,
    pub alias: String,
}

impl fmt::Display for ComputeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} as {}", self.expr, self.alias)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchExpr {
    Term(String),
    And(Box<SearchExpr>, Box<SearchExpr>),
    Or(Box<SearchExpr>, Box<SearchExpr>),
    Not(Box<SearchExpr>),
}

impl SearchExpr {
    /// Evaluate with `matches` deciding single terms.
    pub fn evaluate(&self, matches: &mut impl FnMut(&str) -> bool) -> bool {
        match self {
            SearchExpr::Term(t) => matches(t),
            SearchExpr::And(a, b) => a.evaluate(matches) && b.evaluate(matches),
            SearchExpr::Or(a, b) => a.evaluate(matches) || b.evaluate(matches),
            SearchExpr::Not(a) => !a.evaluate(matches),
        }
    }
}

impl fmt::Display for SearchExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchExpr::Term(t) if t.contains(|c: char| c.is_whitespace() || "()\"".contains(c)) => {
                write!(f, "\"{}\"", t.replace('"', "\\\""))
            }
            SearchExpr::Term(t) => f.write_str(t),
            SearchExpr::And(a, b) => write!(f, "({a} AND {b})"),
            SearchExpr::Or(a, b) => write!(f, "({a} OR {b})"),
            SearchExpr::Not(a) => write!(f, "NOT {a}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_nested_binary_with_parens() {
        let e = Expr::binary(
            BinaryOp::And,
            Expr::binary(BinaryOp::Eq, Expr::member("Name"), Expr::Literal("a".into())),
            Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(Expr::binary(
                    BinaryOp::Gt,
                    Expr::member("Age"),
                    Expr::Literal(Value::Int(3)),
                )),
            },
        );
        assert_eq!(e.to_string(), "(Name eq 'a') and (not (Age gt 3))");
        assert_eq!(e.node_count(), 8);
    }

    #[test]
    fn renders_expand_options() {
        let item = ExpandItem {
            path: ExpandPath::Path(vec!["Orders".to_owned()]),
            options: NestedOptions {
                top: Some(2),
                levels: Some(Levels::Max),
                ..NestedOptions::default()
            },
        };
        assert_eq!(item.to_string(), "Orders($top=2;$levels=max)");
    }
}
