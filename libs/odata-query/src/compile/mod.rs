//! Compilation of bound trees into reusable closures.
//!
//! A [`CompiledExpr`] is an `Arc`'d closure evaluated against a [`Scope`].
//! Null propagation and the request schema are captured at compile time, so
//! evaluation never consults settings.

pub mod ops;
pub mod plan;
pub mod scope;

use std::fmt;
use std::sync::Arc;

use odata_edm::{TypeKind, TypeRef, Value};

use crate::bind::bound::{Bound, BoundKind};
use crate::bind::functions::BoundFunction;
use crate::bind::schema::Schema;
use crate::error::ExecutionError;
use crate::syntax::ast::{BinaryOp, LambdaKind, UnaryOp};

pub use plan::{CompiledExpansion, CompiledOrder, CompiledPlan, CompiledProjection, PlanCache};
pub use scope::Scope;

type EvalFn = dyn Fn(&Scope<'_>) -> Result<Value, ExecutionError> + Send + Sync;

/// A compiled expression; cheap to clone and share across threads.
#[derive(Clone)]
pub struct CompiledExpr(Arc<EvalFn>);

impl fmt::Debug for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompiledExpr")
    }
}

impl CompiledExpr {
    fn new<F>(f: F) -> Self
    where
        F: Fn(&Scope<'_>) -> Result<Value, ExecutionError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Evaluate against `scope`.
    ///
    /// # Errors
    /// Propagates [`ExecutionError`] from operators, functions and null references.
    pub fn eval(&self, scope: &Scope<'_>) -> Result<Value, ExecutionError> {
        (self.0)(scope)
    }

    /// Evaluate as a predicate: only `true` passes, `null` and `false` reject.
    ///
    /// # Errors
    /// Same as [`CompiledExpr::eval`].
    pub fn matches(&self, scope: &Scope<'_>) -> Result<bool, ExecutionError> {
        Ok(matches!(self.eval(scope)?, Value::Bool(true)))
    }
}

/// Turns bound trees into [`CompiledExpr`]s.
#[derive(Clone, Debug)]
pub struct Compiler {
    schema: Arc<Schema>,
    propagate_nulls: bool,
}

fn truth(v: &Value) -> Result<Option<bool>, ExecutionError> {
    match v {
        Value::Bool(b) => Ok(Some(*b)),
        Value::Null => Ok(None),
        other => Err(ExecutionError::TypeError(format!(
            "expected a boolean, found {}",
            other.kind_name()
        ))),
    }
}

impl Compiler {
    #[must_use]
    pub const fn new(schema: Arc<Schema>, propagate_nulls: bool) -> Self {
        Self {
            schema,
            propagate_nulls,
        }
    }

    #[must_use]
    pub const fn propagates_nulls(&self) -> bool {
        self.propagate_nulls
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[must_use]
    pub fn compile(&self, b: &Bound) -> CompiledExpr {
        match &b.kind {
            BoundKind::Constant(v) => {
                let v = v.clone();
                CompiledExpr::new(move |_| Ok(v.clone()))
            }
            BoundKind::Parameter(i) => {
                let i = *i;
                CompiledExpr::new(move |scope| {
                    scope.params().get(i).cloned().ok_or_else(|| {
                        ExecutionError::TypeError(format!("parameter @p{i} was not supplied"))
                    })
                })
            }
            BoundKind::RangeVariable { name, slot } => {
                let (name, slot) = (name.clone(), *slot);
                CompiledExpr::new(move |scope| {
                    scope.slot(slot).cloned().ok_or_else(|| {
                        ExecutionError::TypeError(format!("range variable `{name}` is not in scope"))
                    })
                })
            }
            BoundKind::Property {
                source,
                property,
                path,
            } => self.member(source, property.name.clone(), path.clone()),
            BoundKind::DynamicProperty { source, name, path } => {
                self.member(source, Arc::from(name.as_str()), path.clone())
            }
            BoundKind::Count { source, path, .. } => {
                let source = self.compile(source);
                let (propagate, path) = (self.propagate_nulls, path.clone());
                CompiledExpr::new(move |scope| match source.eval(scope)? {
                    Value::Collection(items) => {
                        Ok(Value::Int(i64::try_from(items.len()).unwrap_or(i64::MAX)))
                    }
                    Value::Null if propagate => Ok(Value::Null),
                    Value::Null => Err(ExecutionError::NullReference {
                        path: format!("{path}/$count"),
                    }),
                    other => Err(ExecutionError::TypeError(format!(
                        "cannot count {}",
                        other.kind_name()
                    ))),
                })
            }
            BoundKind::Lambda {
                kind, source, body, ..
            } => self.lambda(*kind, source, body.as_deref()),
            BoundKind::Call { function, args } => {
                let args: Vec<_> = args.iter().map(|a| self.compile(a)).collect();
                let function = function.clone();
                CompiledExpr::new(move |scope| {
                    let values = args
                        .iter()
                        .map(|a| a.eval(scope))
                        .collect::<Result<Vec<_>, _>>()?;
                    match &function {
                        BoundFunction::Canonical(c) => ops::call_canonical(*c, &values),
                        BoundFunction::Custom(c) => (c.body)(&values),
                    }
                })
            }
            BoundKind::Binary { op, left, right } => self.binary(*op, left, right),
            BoundKind::Unary { op, operand } => {
                let operand = self.compile(operand);
                match op {
                    UnaryOp::Not => CompiledExpr::new(move |scope| {
                        Ok(match truth(&operand.eval(scope)?)? {
                            Some(b) => Value::Bool(!b),
                            None => Value::Null,
                        })
                    }),
                    UnaryOp::Negate => CompiledExpr::new(move |scope| ops::negate(&operand.eval(scope)?)),
                }
            }
            BoundKind::In { operand, list } => {
                let operand = self.compile(operand);
                let list: Vec<_> = list.iter().map(|i| self.compile(i)).collect();
                CompiledExpr::new(move |scope| {
                    let v = operand.eval(scope)?;
                    for item in &list {
                        if v.equals(&item.eval(scope)?) {
                            return Ok(Value::Bool(true));
                        }
                    }
                    Ok(Value::Bool(false))
                })
            }
            BoundKind::IsOf { operand, target } => {
                let operand = self.compile(operand);
                let (schema, target) = (self.schema.clone(), target.clone());
                CompiledExpr::new(move |scope| {
                    Ok(Value::Bool(is_instance(&schema, &operand.eval(scope)?, &target)))
                })
            }
            BoundKind::Cast { operand, target } => {
                let operand = self.compile(operand);
                let (schema, target) = (self.schema.clone(), target.clone());
                CompiledExpr::new(move |scope| {
                    let v = operand.eval(scope)?;
                    Ok(match &target.kind {
                        TypeKind::Primitive(k) => ops::cast_primitive(&v, *k),
                        _ if is_instance(&schema, &v, &target) => v,
                        _ => Value::Null,
                    })
                })
            }
        }
    }

    fn member(&self, source: &Bound, name: Arc<str>, path: String) -> CompiledExpr {
        let source = self.compile(source);
        let propagate = self.propagate_nulls;
        CompiledExpr::new(move |scope| match source.eval(scope)? {
            Value::Record(r) => Ok(r.get(&name).cloned().unwrap_or(Value::Null)),
            Value::Null if propagate => Ok(Value::Null),
            Value::Null => Err(ExecutionError::NullReference { path: path.clone() }),
            other => Err(ExecutionError::TypeError(format!(
                "`{path}`: cannot access a property of {}",
                other.kind_name()
            ))),
        })
    }

    fn lambda(&self, kind: LambdaKind, source: &Bound, body: Option<&Bound>) -> CompiledExpr {
        let source = self.compile(source);
        let body = body.map(|b| self.compile(b));
        CompiledExpr::new(move |scope| {
            let items = match source.eval(scope)? {
                Value::Collection(items) => items,
                Value::Null => Arc::from(Vec::new()),
                other => {
                    return Err(ExecutionError::TypeError(format!(
                        "{}() over {}",
                        kind.keyword(),
                        other.kind_name()
                    )));
                }
            };
            let Some(body) = &body else {
                return Ok(Value::Bool(kind == LambdaKind::All || !items.is_empty()));
            };
            for item in items.iter() {
                let inner = scope.child(item);
                let hit = body.matches(&inner)?;
                match kind {
                    LambdaKind::Any if hit => return Ok(Value::Bool(true)),
                    LambdaKind::All if !hit => return Ok(Value::Bool(false)),
                    _ => {}
                }
            }
            Ok(Value::Bool(kind == LambdaKind::All))
        })
    }

    fn binary(&self, op: BinaryOp, left: &Bound, right: &Bound) -> CompiledExpr {
        let l = self.compile(left);
        let r = self.compile(right);
        match op {
            BinaryOp::And => CompiledExpr::new(move |scope| {
                let a = truth(&l.eval(scope)?)?;
                if a == Some(false) {
                    return Ok(Value::Bool(false));
                }
                let b = truth(&r.eval(scope)?)?;
                Ok(match (a, b) {
                    (_, Some(false)) => Value::Bool(false),
                    (Some(true), Some(true)) => Value::Bool(true),
                    _ => Value::Null,
                })
            }),
            BinaryOp::Or => CompiledExpr::new(move |scope| {
                let a = truth(&l.eval(scope)?)?;
                if a == Some(true) {
                    return Ok(Value::Bool(true));
                }
                let b = truth(&r.eval(scope)?)?;
                Ok(match (a, b) {
                    (_, Some(true)) => Value::Bool(true),
                    (Some(false), Some(false)) => Value::Bool(false),
                    _ => Value::Null,
                })
            }),
            BinaryOp::Has => CompiledExpr::new(move |scope| ops::has_flag(&l.eval(scope)?, &r.eval(scope)?)),
            op if op.is_comparison() => {
                CompiledExpr::new(move |scope| ops::compare(op, &l.eval(scope)?, &r.eval(scope)?))
            }
            op => CompiledExpr::new(move |scope| ops::arithmetic(op, &l.eval(scope)?, &r.eval(scope)?)),
        }
    }
}

/// Runtime `isof`: structured values by type name, primitives by kind.
pub(crate) fn is_instance(schema: &Schema, v: &Value, target: &TypeRef) -> bool {
    match (v, &target.kind) {
        (Value::Null, _) => false,
        (Value::Record(r), TypeKind::Entity(t) | TypeKind::Complex(t)) => {
            schema.is_assignable_to(r.type_name(), t)
        }
        (Value::Enum(e), TypeKind::Enum(t)) => e.type_name == *t,
        (v, TypeKind::Primitive(k)) => ops::is_primitive_of(v, *k),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::functions::FunctionRegistry;
    use crate::bind::{BindTarget, bind_query};
    use crate::settings::ParserSettings;
    use crate::syntax::parse_query;
    use odata_edm::{EdmModel, EdmModelBuilder, PrimitiveKind, Property, Record, StructuredType};

    fn model() -> Arc<EdmModel> {
        EdmModelBuilder::new("Default")
            .add_structured_type(
                StructuredType::complex("Ns", "Address").with_property(Property::structural("City", TypeRef::string())),
            )
            .add_structured_type(
                StructuredType::entity("Ns", "Person")
                    .with_property(Property::structural(
                        "Id",
                        TypeRef::primitive(PrimitiveKind::Int32).required(),
                    ))
                    .with_property(Property::structural("Name", TypeRef::string()))
                    .with_property(Property::structural("Address", TypeRef::complex("Ns.Address")))
                    .with_property(Property::structural(
                        "Tags",
                        TypeRef::collection(TypeRef::string()),
                    ))
                    .with_key("Id"),
            )
            .add_entity_set("People", "Ns.Person")
            .build()
            .unwrap()
    }

    fn eval(filter: &str, propagate: bool, record: Record) -> Result<Value, ExecutionError> {
        let model = model();
        let parsed = parse_query(&format!("$filter={filter}"), &ParserSettings::default()).unwrap();
        let target = BindTarget::entity_set(&model, "People").unwrap();
        let bound = bind_query(&parsed, &model, &target, &FunctionRegistry::new(), None).unwrap();
        let compiled = Compiler::new(bound.schema.clone(), propagate).compile(&bound.filter.unwrap());
        let it = Value::Record(Arc::new(record));
        compiled.eval(&Scope::root(&it, &[]))
    }

    fn person() -> Record {
        Record::new("Ns.Person")
            .with("Id", 1)
            .with("Name", "Ann")
            .with("Tags", Value::from(vec![Value::from("a"), Value::from("b")]))
    }

    #[test]
    fn null_propagation_toggles_null_reference() {
        assert_eq!(eval("Address/City eq 'X'", true, person()).unwrap(), Value::Bool(false));
        let err = eval("Address/City eq 'X'", false, person()).unwrap_err();
        assert!(matches!(err, ExecutionError::NullReference { path } if path == "Address/City"));
    }

    #[test]
    fn three_valued_logic() {
        assert_eq!(eval("Name eq 'Ann' or Address/City eq 'X'", true, person()).unwrap(), Value::Bool(true));
        assert_eq!(eval("contains(Address/City,'a') and Id eq 1", true, person()).unwrap(), Value::Null);
        assert_eq!(eval("not contains(Address/City,'a')", true, person()).unwrap(), Value::Null);
    }

    #[test]
    fn lambdas_over_primitive_collections() {
        assert_eq!(eval("Tags/any(t:t eq 'b')", true, person()).unwrap(), Value::Bool(true));
        assert_eq!(eval("Tags/all(t:t eq 'b')", true, person()).unwrap(), Value::Bool(false));
        assert_eq!(eval("Tags/$count eq 2", true, person()).unwrap(), Value::Bool(true));
        assert_eq!(eval("Tags/any()", true, person()).unwrap(), Value::Bool(true));
    }

    #[test]
    fn isof_and_in() {
        assert_eq!(eval("isof(Ns.Person)", true, person()).unwrap(), Value::Bool(true));
        assert_eq!(eval("Name in ('Bob','Ann')", true, person()).unwrap(), Value::Bool(true));
    }
}
