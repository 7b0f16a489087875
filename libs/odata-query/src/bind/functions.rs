//! Canonical function signatures, custom function registry and overload
//! resolution.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use odata_edm::{PrimitiveKind, TypeRef, Value};

use crate::error::ExecutionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Canonical {
    Contains,
    StartsWith,
    EndsWith,
    Length,
    IndexOf,
    Substring,
    ToLower,
    ToUpper,
    Trim,
    Concat,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    FractionalSeconds,
    Date,
    Time,
    TotalOffsetMinutes,
    Now,
    MinDateTime,
    MaxDateTime,
    Round,
    Floor,
    Ceiling,
}

impl Canonical {
    const ALL: [Canonical; 26] = [
        Canonical::Contains,
        Canonical::StartsWith,
        Canonical::EndsWith,
        Canonical::Length,
        Canonical::IndexOf,
        Canonical::Substring,
        Canonical::ToLower,
        Canonical::ToUpper,
        Canonical::Trim,
        Canonical::Concat,
        Canonical::Year,
        Canonical::Month,
        Canonical::Day,
        Canonical::Hour,
        Canonical::Minute,
        Canonical::Second,
        Canonical::FractionalSeconds,
        Canonical::Date,
        Canonical::Time,
        Canonical::TotalOffsetMinutes,
        Canonical::Now,
        Canonical::MinDateTime,
        Canonical::MaxDateTime,
        Canonical::Round,
        Canonical::Floor,
        Canonical::Ceiling,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Canonical::Contains => "contains",
            Canonical::StartsWith => "startswith",
            Canonical::EndsWith => "endswith",
            Canonical::Length => "length",
            Canonical::IndexOf => "indexof",
            Canonical::Substring => "substring",
            Canonical::ToLower => "tolower",
            Canonical::ToUpper => "toupper",
            Canonical::Trim => "trim",
            Canonical::Concat => "concat",
            Canonical::Year => "year",
            Canonical::Month => "month",
            Canonical::Day => "day",
            Canonical::Hour => "hour",
            Canonical::Minute => "minute",
            Canonical::Second => "second",
            Canonical::FractionalSeconds => "fractionalseconds",
            Canonical::Date => "date",
            Canonical::Time => "time",
            Canonical::TotalOffsetMinutes => "totaloffsetminutes",
            Canonical::Now => "now",
            Canonical::MinDateTime => "mindatetime",
            Canonical::MaxDateTime => "maxdatetime",
            Canonical::Round => "round",
            Canonical::Floor => "floor",
            Canonical::Ceiling => "ceiling",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Overloads as (parameter kinds, return kind).
    fn overloads(self) -> Vec<(Vec<PrimitiveKind>, PrimitiveKind)> {
        use PrimitiveKind as P;
        let s = P::String;
        match self {
            Canonical::Contains | Canonical::StartsWith | Canonical::EndsWith => {
                vec![(vec![s, s], P::Boolean)]
            }
            Canonical::Length => vec![(vec![s], P::Int32)],
            Canonical::IndexOf => vec![(vec![s, s], P::Int32)],
            Canonical::Substring => vec![
                (vec![s, P::Int32], s),
                (vec![s, P::Int32, P::Int32], s),
            ],
            Canonical::ToLower | Canonical::ToUpper | Canonical::Trim => vec![(vec![s], s)],
            Canonical::Concat => vec![(vec![s, s], s)],
            Canonical::Year | Canonical::Month | Canonical::Day => vec![
                (vec![P::DateTimeOffset], P::Int32),
                (vec![P::Date], P::Int32),
            ],
            Canonical::Hour | Canonical::Minute | Canonical::Second => vec![
                (vec![P::DateTimeOffset], P::Int32),
                (vec![P::TimeOfDay], P::Int32),
            ],
            Canonical::FractionalSeconds => vec![
                (vec![P::DateTimeOffset], P::Decimal),
                (vec![P::TimeOfDay], P::Decimal),
            ],
            Canonical::Date => vec![(vec![P::DateTimeOffset], P::Date)],
            Canonical::Time => vec![(vec![P::DateTimeOffset], P::TimeOfDay)],
            Canonical::TotalOffsetMinutes => vec![(vec![P::DateTimeOffset], P::Int32)],
            Canonical::Now | Canonical::MinDateTime | Canonical::MaxDateTime => {
                vec![(vec![], P::DateTimeOffset)]
            }
            Canonical::Round | Canonical::Floor | Canonical::Ceiling => vec![
                (vec![P::Decimal], P::Decimal),
                (vec![P::Double], P::Double),
            ],
        }
    }
}

/// Implementation of a model-declared custom function. The binding
/// parameter, when there is one, comes first.
pub type CustomFn = dyn Fn(&[Value]) -> Result<Value, ExecutionError> + Send + Sync;

#[derive(Clone)]
pub struct CustomFunction {
    pub name: Arc<str>,
    pub body: Arc<CustomFn>,
}

impl fmt::Debug for CustomFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CustomFunction {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BoundFunction {
    Canonical(Canonical),
    Custom(CustomFunction),
}

impl BoundFunction {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            BoundFunction::Canonical(c) => c.name(),
            BoundFunction::Custom(c) => &c.name,
        }
    }
}

/// Implementations for functions declared on the model, keyed by qualified name.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<Arc<str>, Arc<CustomFn>>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl FunctionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn register<F>(mut self, full_name: &str, body: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ExecutionError> + Send + Sync + 'static,
    {
        self.functions.insert(Arc::from(full_name), Arc::new(body));
        self
    }

    #[must_use]
    pub fn get(&self, full_name: &str) -> Option<CustomFunction> {
        self.functions
            .get_key_value(full_name)
            .map(|(name, body)| CustomFunction {
                name: name.clone(),
                body: body.clone(),
            })
    }
}

/// Promotion distance from `arg` to `param`; `None` when not convertible.
/// An untyped argument (the `null` literal or a dynamic property) fits anything.
pub(crate) fn conversion_cost(arg: Option<&TypeRef>, param: &TypeRef) -> Option<u32> {
    let Some(arg) = arg else {
        return Some(0);
    };
    if arg.kind == param.kind {
        return Some(0);
    }
    match (arg.as_primitive(), param.as_primitive()) {
        (Some(a), Some(p)) if a.is_numeric() && p.is_numeric() => {
            let (ra, rp) = (a.promotion_rank()?, p.promotion_rank()?);
            (ra <= rp).then(|| u32::from(rp - ra))
        }
        _ => None,
    }
}

/// Pick the overload with the lowest total conversion cost.
pub(crate) enum Resolution<T> {
    Unique(T),
    Ambiguous,
    NoMatch,
}

pub(crate) fn pick_overload<'a, T>(
    candidates: impl IntoIterator<Item = (&'a [TypeRef], T)>,
    args: &[Option<&TypeRef>],
) -> Resolution<T> {
    let mut best: Option<(u32, T)> = None;
    let mut tied = false;
    for (params, item) in candidates {
        if params.len() != args.len() {
            continue;
        }
        let cost: Option<u32> = params
            .iter()
            .zip(args)
            .map(|(p, a)| conversion_cost(*a, p))
            .sum();
        let Some(cost) = cost else { continue };
        match &best {
            Some((c, _)) if *c < cost => {}
            Some((c, _)) if *c == cost => tied = true,
            _ => {
                best = Some((cost, item));
                tied = false;
            }
        }
    }
    match best {
        Some(_) if tied => Resolution::Ambiguous,
        Some((_, item)) => Resolution::Unique(item),
        None => Resolution::NoMatch,
    }
}

/// Resolve a canonical call; returns the result type.
pub(crate) fn resolve_canonical(
    function: Canonical,
    args: &[Option<&TypeRef>],
) -> Resolution<TypeRef> {
    let overloads: Vec<(Vec<TypeRef>, TypeRef)> = function
        .overloads()
        .into_iter()
        .map(|(params, ret)| {
            (
                params.into_iter().map(TypeRef::primitive).collect(),
                TypeRef::primitive(ret),
            )
        })
        .collect();
    pick_overload(
        overloads.iter().map(|(p, r)| (p.as_slice(), r.clone())),
        args,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(k: PrimitiveKind) -> TypeRef {
        TypeRef::primitive(k)
    }

    #[test]
    fn picks_closest_numeric_overload() {
        let int = t(PrimitiveKind::Int32);
        let Resolution::Unique(ret) = resolve_canonical(Canonical::Round, &[Some(&int)]) else {
            panic!("expected a unique overload");
        };
        assert_eq!(ret, t(PrimitiveKind::Decimal));

        let dbl = t(PrimitiveKind::Double);
        let Resolution::Unique(ret) = resolve_canonical(Canonical::Floor, &[Some(&dbl)]) else {
            panic!("expected a unique overload");
        };
        assert_eq!(ret, dbl);
    }

    #[test]
    fn null_argument_is_ambiguous_across_overloads() {
        assert!(matches!(
            resolve_canonical(Canonical::Year, &[None]),
            Resolution::Ambiguous
        ));
    }

    #[test]
    fn wrong_arity_or_type_does_not_match() {
        let s = TypeRef::string();
        assert!(matches!(
            resolve_canonical(Canonical::Contains, &[Some(&s)]),
            Resolution::NoMatch
        ));
        let b = TypeRef::boolean();
        assert!(matches!(
            resolve_canonical(Canonical::ToLower, &[Some(&b)]),
            Resolution::NoMatch
        ));
    }

    #[test]
    fn registry_lookup() {
        let reg = FunctionRegistry::new().register("Ns.Double", |args| {
            Ok(Value::Int(args[0].as_i64().unwrap_or(0) * 2))
        });
        let f = reg.get("Ns.Double").unwrap();
        assert_eq!((f.body)(&[Value::Int(4)]).unwrap(), Value::Int(8));
        assert!(reg.get("Ns.Other").is_none());
    }
}
