//! Binding of common expressions against a structured element type.

use odata_edm::{EnumValue, PrimitiveKind, TypeKind, TypeRef, Value};

use super::bound::{Bound, BoundKind};
use super::functions::{
    BoundFunction, Canonical, FunctionRegistry, Resolution, pick_overload, resolve_canonical,
};
use super::schema::Schema;
use crate::error::BindError;
use crate::syntax::ast::{BinaryOp, Expr, TypeCheckKind, UnaryOp};

struct RangeScope {
    name: String,
    type_ref: TypeRef,
}

pub struct ExprBinder<'a> {
    schema: &'a Schema,
    functions: &'a FunctionRegistry,
    /// Slot 0 is `$it`; lambda variables follow in nesting order.
    scopes: Vec<RangeScope>,
}

fn type_label(t: Option<&TypeRef>) -> String {
    t.map_or_else(|| "null".to_owned(), ToString::to_string)
}

/// Type of a literal produced by the parser.
#[must_use]
pub fn literal_type(v: &Value) -> Option<TypeRef> {
    let kind = match v {
        Value::Null | Value::Record(_) | Value::Collection(_) => return None,
        Value::Bool(_) => PrimitiveKind::Boolean,
        Value::Int(i) if i32::try_from(*i).is_ok() => PrimitiveKind::Int32,
        Value::Int(_) => PrimitiveKind::Int64,
        Value::Double(_) => PrimitiveKind::Double,
        Value::Decimal(_) => PrimitiveKind::Decimal,
        Value::String(_) => PrimitiveKind::String,
        Value::Guid(_) => PrimitiveKind::Guid,
        Value::DateTimeOffset(_) => PrimitiveKind::DateTimeOffset,
        Value::Date(_) => PrimitiveKind::Date,
        Value::TimeOfDay(_) => PrimitiveKind::TimeOfDay,
        Value::Duration(_) => PrimitiveKind::Duration,
        Value::Enum(e) => return Some(TypeRef::enumeration(e.type_name.clone()).required()),
    };
    Some(TypeRef::primitive(kind).required())
}

/// Canonical path text of a bound path node, relative to `$it`.
pub(crate) fn path_of(b: &Bound) -> String {
    match &b.kind {
        BoundKind::RangeVariable { slot: 0, .. } => String::new(),
        BoundKind::RangeVariable { name, .. } => name.clone(),
        BoundKind::Property { path, .. } | BoundKind::DynamicProperty { path, .. } => path.clone(),
        BoundKind::Cast { operand, target } => join_path(&path_of(operand), &target.to_string()),
        _ => b.to_string(),
    }
}

fn join_path(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_owned()
    } else {
        format!("{parent}/{segment}")
    }
}

fn is_boolean_or_untyped(b: &Bound) -> bool {
    b.type_ref.as_ref().is_none_or(TypeRef::is_boolean)
}

/// Comparable after numeric promotion and nullable unwrapping.
fn comparable(l: Option<&TypeRef>, r: Option<&TypeRef>) -> bool {
    match (l, r) {
        (None, _) | (_, None) => true,
        (Some(l), Some(r)) => {
            if l.is_numeric() && r.is_numeric() {
                return true;
            }
            match (&l.kind, &r.kind) {
                (TypeKind::Primitive(a), TypeKind::Primitive(b)) => a == b,
                (TypeKind::Enum(a), TypeKind::Enum(b)) => a == b,
                _ => false,
            }
        }
    }
}

fn numeric_result(op: BinaryOp, l: PrimitiveKind, r: PrimitiveKind) -> Option<PrimitiveKind> {
    let promoted = l.promote(r)?;
    Some(match op {
        BinaryOp::DivBy if promoted.is_integral() => PrimitiveKind::Decimal,
        _ => promoted,
    })
}

fn temporal_result(op: BinaryOp, l: PrimitiveKind, r: PrimitiveKind) -> Option<PrimitiveKind> {
    use PrimitiveKind as P;
    match (op, l, r) {
        (BinaryOp::Add | BinaryOp::Sub, P::DateTimeOffset, P::Duration) => Some(P::DateTimeOffset),
        (BinaryOp::Add | BinaryOp::Sub, P::Date, P::Duration) => Some(P::Date),
        (BinaryOp::Add | BinaryOp::Sub, P::Duration, P::Duration)
        | (BinaryOp::Sub, P::DateTimeOffset, P::DateTimeOffset)
        | (BinaryOp::Sub, P::Date, P::Date) => Some(P::Duration),
        _ => None,
    }
}

impl<'a> ExprBinder<'a> {
    /// Binder whose `$it` is an instance of `element`.
    #[must_use]
    pub fn new(schema: &'a Schema, functions: &'a FunctionRegistry, element: TypeRef) -> Self {
        Self {
            schema,
            functions,
            scopes: vec![RangeScope {
                name: "$it".to_owned(),
                type_ref: element,
            }],
        }
    }

    fn it(&self) -> Bound {
        self.range_variable(0)
    }

    fn range_variable(&self, slot: usize) -> Bound {
        let scope = &self.scopes[slot];
        Bound::new(
            BoundKind::RangeVariable {
                name: scope.name.clone(),
                slot,
            },
            Some(scope.type_ref.clone()),
        )
    }

    fn lambda_slot(&self, name: &str) -> Option<usize> {
        self.scopes
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .find(|(_, s)| s.name == name)
            .map(|(i, _)| i)
    }

    /// Bind an expression that must be boolean.
    ///
    /// # Errors
    /// Returns [`BindError`] when binding fails or the result is not boolean.
    pub fn bind_predicate(&mut self, e: &Expr, context: &str) -> Result<Bound, BindError> {
        let b = self.bind(e)?;
        if !is_boolean_or_untyped(&b) {
            return Err(BindError::ExpectedType {
                context: context.to_owned(),
                expected: "Edm.Boolean".to_owned(),
                found: type_label(b.type_ref.as_ref()),
            });
        }
        Ok(b)
    }

    /// Bind an expression that must produce a single primitive or enum value.
    ///
    /// # Errors
    /// Returns [`BindError`] for structured or collection-valued expressions.
    pub fn bind_single_value(&mut self, e: &Expr, context: &str) -> Result<Bound, BindError> {
        let b = self.bind(e)?;
        let ok = match &b.type_ref {
            None => true,
            Some(t) => matches!(t.kind, TypeKind::Primitive(_) | TypeKind::Enum(_)),
        };
        if !ok && !matches!(b.kind, BoundKind::RangeVariable { .. }) {
            return Err(BindError::ExpectedType {
                context: context.to_owned(),
                expected: "a single primitive value".to_owned(),
                found: type_label(b.type_ref.as_ref()),
            });
        }
        Ok(b)
    }

    /// Bind any expression.
    ///
    /// # Errors
    /// Returns [`BindError`] describing the first node that cannot be bound.
    pub fn bind(&mut self, e: &Expr) -> Result<Bound, BindError> {
        match e {
            Expr::Literal(v) => Ok(Bound::constant(v.clone(), literal_type(v))),
            Expr::EnumLiteral { type_name, member } => self.enum_literal(type_name, member),
            Expr::Member { parent, name } => self.member(parent.as_deref(), name),
            Expr::Count(source) => self.count(source),
            Expr::RangeVariable(name) => Ok(if name == "$this" {
                self.range_variable(self.scopes.len() - 1)
            } else {
                self.it()
            }),
            Expr::Lambda {
                kind,
                source,
                variable,
                body,
            } => {
                let source = self.bind(source)?;
                let element = match &source.type_ref {
                    Some(t) if t.is_collection() => t.element().clone(),
                    other => {
                        return Err(BindError::ExpectedType {
                            context: format!("{}()", kind.keyword()),
                            expected: "a collection".to_owned(),
                            found: type_label(other.as_ref()),
                        });
                    }
                };
                let (Some(variable), Some(body)) = (variable, body) else {
                    return Ok(Bound::new(
                        BoundKind::Lambda {
                            kind: *kind,
                            source: Box::new(source),
                            variable: String::new(),
                            slot: self.scopes.len(),
                            body: None,
                        },
                        Some(TypeRef::boolean().required()),
                    ));
                };
                if variable.starts_with('$') || self.scopes.iter().any(|s| &s.name == variable) {
                    return Err(BindError::RangeVariableShadowed(variable.clone()));
                }
                let slot = self.scopes.len();
                self.scopes.push(RangeScope {
                    name: variable.clone(),
                    type_ref: element,
                });
                let body = self.bind_predicate(body, &format!("{}() body", kind.keyword()));
                self.scopes.pop();
                Ok(Bound::new(
                    BoundKind::Lambda {
                        kind: *kind,
                        source: Box::new(source),
                        variable: variable.clone(),
                        slot,
                        body: Some(Box::new(body?)),
                    },
                    Some(TypeRef::boolean().required()),
                ))
            }
            Expr::Call { parent, name, args } => self.call(parent.as_deref(), name, args),
            Expr::Binary { op, left, right } => self.binary(*op, left, right),
            Expr::Unary { op, operand } => self.unary(*op, operand),
            Expr::In { operand, list } => {
                let operand = self.bind(operand)?;
                let mut items = Vec::with_capacity(list.len());
                for item in list {
                    let item = self.bind(item)?;
                    let item = self.coerce_enum(operand.type_ref.as_ref(), item)?;
                    if !comparable(operand.type_ref.as_ref(), item.type_ref.as_ref()) {
                        return Err(BindError::TypeMismatch {
                            operator: "in".to_owned(),
                            left: type_label(operand.type_ref.as_ref()),
                            right: type_label(item.type_ref.as_ref()),
                        });
                    }
                    items.push(item);
                }
                Ok(Bound::new(
                    BoundKind::In {
                        operand: Box::new(operand),
                        list: items,
                    },
                    Some(TypeRef::boolean()),
                ))
            }
            Expr::TypeCheck {
                kind,
                operand,
                type_name,
            } => {
                let operand = match operand {
                    Some(o) => self.bind(o)?,
                    None => self.it(),
                };
                let target = self
                    .schema
                    .resolve_type(type_name)
                    .ok_or_else(|| BindError::TypeNotFound(type_name.clone()))?;
                self.check_cast(&operand, &target)?;
                Ok(match kind {
                    TypeCheckKind::IsOf => Bound::new(
                        BoundKind::IsOf {
                            operand: Box::new(operand),
                            target,
                        },
                        Some(TypeRef::boolean().required()),
                    ),
                    TypeCheckKind::Cast => Bound::new(
                        BoundKind::Cast {
                            operand: Box::new(operand),
                            target: target.clone(),
                        },
                        Some(target),
                    ),
                })
            }
        }
    }

    fn check_cast(&self, operand: &Bound, target: &TypeRef) -> Result<(), BindError> {
        let Some(from) = &operand.type_ref else {
            return Ok(());
        };
        let ok = match (from.structured_name(), target.structured_name()) {
            (Some(a), Some(b)) => {
                self.schema.is_assignable_to(b, a) || self.schema.is_assignable_to(a, b)
            }
            (None, None) => match (from.as_primitive(), target.as_primitive()) {
                (Some(a), Some(b)) => {
                    a == b || (a.is_numeric() && b.is_numeric()) || b == PrimitiveKind::String
                }
                _ => from.kind == target.kind,
            },
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(BindError::InvalidCast {
                from: from.to_string(),
                to: target.to_string(),
            })
        }
    }

    fn enum_literal(&self, type_name: &str, member: &str) -> Result<Bound, BindError> {
        let et = self
            .schema
            .model()
            .enum_type(type_name)
            .ok_or_else(|| BindError::TypeNotFound(type_name.to_owned()))?;
        let value = self.enum_value(&et.full_name, member)?;
        Ok(Bound::constant(Value::Enum(value), Some(et.type_ref().required())))
    }

    fn enum_value(&self, enum_name: &str, member: &str) -> Result<EnumValue, BindError> {
        let unknown = || BindError::UnknownEnumMember {
            enum_type: enum_name.to_owned(),
            member: member.to_owned(),
        };
        let et = self
            .schema
            .model()
            .enum_type(enum_name)
            .ok_or_else(|| BindError::TypeNotFound(enum_name.to_owned()))?;
        let mut value = 0i64;
        let mut names = Vec::new();
        let parts: Vec<&str> = member.split(',').map(str::trim).collect();
        if parts.len() > 1 && !et.is_flags {
            return Err(unknown());
        }
        for part in parts {
            let m = match et.member(part) {
                Some(m) => m,
                None => part
                    .parse::<i64>()
                    .ok()
                    .and_then(|v| et.member_by_value(v))
                    .ok_or_else(unknown)?,
            };
            value |= m.value;
            names.push(m.name.to_string());
        }
        Ok(EnumValue {
            type_name: et.full_name.clone(),
            member: names.join(",").into(),
            value,
        })
    }

    /// Turn a string literal compared against an enum into that enum's member.
    fn coerce_enum(&self, target: Option<&TypeRef>, b: Bound) -> Result<Bound, BindError> {
        let Some(enum_name) = target.and_then(TypeRef::enum_name) else {
            return Ok(b);
        };
        let BoundKind::Constant(Value::String(s)) = &b.kind else {
            return Ok(b);
        };
        let value = self.enum_value(enum_name, s)?;
        Ok(Bound::constant(
            Value::Enum(value),
            Some(TypeRef::enumeration(enum_name.clone()).required()),
        ))
    }

    fn member(&mut self, parent: Option<&Expr>, name: &str) -> Result<Bound, BindError> {
        let source = match parent {
            Some(p) => self.bind(p)?,
            None => {
                if let Some(slot) = self.lambda_slot(name) {
                    return Ok(self.range_variable(slot));
                }
                self.it()
            }
        };
        self.segment(source, name)
    }

    /// Resolve `name` directly on `$it`.
    pub(crate) fn segment_of_it(&self, name: &str) -> Result<Bound, BindError> {
        self.segment(self.it(), name)
    }

    /// Resolve one path segment on `source`.
    pub(crate) fn segment(&self, source: Bound, name: &str) -> Result<Bound, BindError> {
        let path = join_path(&path_of(&source), name);
        let Some(source_type) = source.type_ref.clone() else {
            return Ok(Bound::new(
                BoundKind::DynamicProperty {
                    source: Box::new(source),
                    name: name.to_owned(),
                    path,
                },
                None,
            ));
        };
        let Some(type_name) = source_type.structured_name().cloned() else {
            let found = type_label(Some(&source_type));
            if source_type.is_collection() {
                return Err(BindError::ExpectedType {
                    context: format!("path segment `{name}`"),
                    expected: "a single-valued path".to_owned(),
                    found,
                });
            }
            return Err(BindError::PropertyNotFound {
                property: name.to_owned(),
                type_name: found,
                suggestion: None,
            });
        };

        if name.contains('.') {
            let target = self
                .schema
                .structured(name)
                .ok_or_else(|| BindError::TypeNotFound(name.to_owned()))?;
            if !self.schema.is_assignable_to(&target.full_name, &type_name) {
                return Err(BindError::InvalidCast {
                    from: type_name.to_string(),
                    to: target.full_name.to_string(),
                });
            }
            let target = target.type_ref();
            return Ok(Bound::new(
                BoundKind::Cast {
                    operand: Box::new(source),
                    target: target.clone(),
                },
                Some(target),
            ));
        }

        if let Some(property) = self.schema.find_property(&type_name, name) {
            let type_ref = property.type_ref.clone();
            return Ok(Bound::new(
                BoundKind::Property {
                    source: Box::new(source),
                    property,
                    path,
                },
                Some(type_ref),
            ));
        }
        if self.schema.is_open(&type_name) {
            return Ok(Bound::new(
                BoundKind::DynamicProperty {
                    source: Box::new(source),
                    name: name.to_owned(),
                    path,
                },
                None,
            ));
        }
        Err(BindError::PropertyNotFound {
            property: name.to_owned(),
            type_name: type_name.to_string(),
            suggestion: self.suggest(&type_name, name),
        })
    }

    fn suggest(&self, type_name: &str, name: &str) -> Option<String> {
        self.schema
            .all_properties(type_name)
            .iter()
            .map(|p| (strsim::jaro_winkler(&p.name, name), p.name.clone()))
            .filter(|(score, _)| *score >= 0.8)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, n)| n.to_string())
    }

    fn count(&mut self, source: &Expr) -> Result<Bound, BindError> {
        let source = self.bind(source)?;
        if !source.type_ref.as_ref().is_some_and(TypeRef::is_collection) {
            return Err(BindError::ExpectedType {
                context: "$count".to_owned(),
                expected: "a collection".to_owned(),
                found: type_label(source.type_ref.as_ref()),
            });
        }
        let property = match &source.kind {
            BoundKind::Property { property, .. } => Some(property.clone()),
            _ => None,
        };
        let path = path_of(&source);
        Ok(Bound::new(
            BoundKind::Count {
                source: Box::new(source),
                property,
                path,
            },
            Some(TypeRef::primitive(PrimitiveKind::Int64).required()),
        ))
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<Bound, BindError> {
        let operand = self.bind(operand)?;
        let type_ref = match op {
            UnaryOp::Not => {
                if !is_boolean_or_untyped(&operand) {
                    return Err(BindError::ExpectedType {
                        context: "not".to_owned(),
                        expected: "Edm.Boolean".to_owned(),
                        found: type_label(operand.type_ref.as_ref()),
                    });
                }
                Some(TypeRef::boolean())
            }
            UnaryOp::Negate => {
                let ok = operand.type_ref.as_ref().is_none_or(|t| {
                    t.is_numeric() || t.as_primitive() == Some(PrimitiveKind::Duration)
                });
                if !ok {
                    return Err(BindError::ExpectedType {
                        context: "negation".to_owned(),
                        expected: "a numeric or duration value".to_owned(),
                        found: type_label(operand.type_ref.as_ref()),
                    });
                }
                operand.type_ref.clone()
            }
        };
        Ok(Bound::new(
            BoundKind::Unary {
                op,
                operand: Box::new(operand),
            },
            type_ref,
        ))
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Bound, BindError> {
        let left = self.bind(left)?;
        let right = self.bind(right)?;
        let mismatch = |l: &Bound, r: &Bound| BindError::TypeMismatch {
            operator: op.keyword().to_owned(),
            left: type_label(l.type_ref.as_ref()),
            right: type_label(r.type_ref.as_ref()),
        };

        let (left, right, type_ref) = if op.is_logical() {
            if !is_boolean_or_untyped(&left) || !is_boolean_or_untyped(&right) {
                return Err(mismatch(&left, &right));
            }
            (left, right, Some(TypeRef::boolean()))
        } else if op.is_comparison() {
            let right = self.coerce_enum(left.type_ref.as_ref(), right)?;
            let left = self.coerce_enum(right.type_ref.as_ref(), left)?;
            if !comparable(left.type_ref.as_ref(), right.type_ref.as_ref()) {
                return Err(mismatch(&left, &right));
            }
            (left, right, Some(TypeRef::boolean()))
        } else if op == BinaryOp::Has {
            let right = self.coerce_enum(left.type_ref.as_ref(), right)?;
            let ok = match (&left.type_ref, &right.type_ref) {
                (Some(l), Some(r)) => l.enum_name().is_some() && l.kind == r.kind,
                (Some(l), None) => l.enum_name().is_some(),
                (None, _) => true,
            };
            if !ok {
                return Err(mismatch(&left, &right));
            }
            (left, right, Some(TypeRef::boolean()))
        } else {
            let type_ref = match (&left.type_ref, &right.type_ref) {
                (None, None) => None,
                (Some(t), None) | (None, Some(t)) => {
                    if t.as_primitive().is_none() {
                        return Err(mismatch(&left, &right));
                    }
                    Some(t.clone())
                }
                (Some(l), Some(r)) => {
                    let (Some(lk), Some(rk)) = (l.as_primitive(), r.as_primitive()) else {
                        return Err(mismatch(&left, &right));
                    };
                    let kind = if lk.is_numeric() && rk.is_numeric() {
                        numeric_result(op, lk, rk)
                    } else {
                        temporal_result(op, lk, rk)
                    };
                    let Some(kind) = kind else {
                        return Err(mismatch(&left, &right));
                    };
                    Some(TypeRef::primitive(kind).with_nullable(l.nullable || r.nullable))
                }
            };
            (left, right, type_ref)
        };
        Ok(Bound::new(
            BoundKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            type_ref,
        ))
    }

    fn call(&mut self, parent: Option<&Expr>, name: &str, args: &[Expr]) -> Result<Bound, BindError> {
        let binding = match parent {
            Some(p) => Some(self.bind(p)?),
            None => None,
        };
        let mut bound_args = Vec::with_capacity(args.len());
        for a in args {
            bound_args.push(self.bind(a)?);
        }
        let signature = |binding: Option<&Bound>, args: &[Bound]| {
            let types: Vec<_> = binding
                .into_iter()
                .chain(args)
                .map(|a| type_label(a.type_ref.as_ref()))
                .collect();
            format!("{name}({})", types.join(","))
        };

        if !name.contains('.') {
            let Some(function) = binding.is_none().then(|| Canonical::from_name(name)).flatten() else {
                return Err(BindError::FunctionNotFound {
                    signature: signature(binding.as_ref(), &bound_args),
                });
            };
            let types: Vec<_> = bound_args.iter().map(|a| a.type_ref.as_ref()).collect();
            return match resolve_canonical(function, &types) {
                Resolution::Unique(ret) => Ok(Bound::new(
                    BoundKind::Call {
                        function: BoundFunction::Canonical(function),
                        args: bound_args,
                    },
                    Some(ret),
                )),
                Resolution::Ambiguous => Err(BindError::AmbiguousFunction {
                    signature: signature(None, &bound_args),
                }),
                Resolution::NoMatch => Err(BindError::FunctionNotFound {
                    signature: signature(None, &bound_args),
                }),
            };
        }

        let model = self.schema.model().clone();
        let candidates: Vec<_> = model
            .functions(name)
            .map(|op| {
                let params: Vec<TypeRef> = op.parameters.iter().map(|p| p.type_ref.clone()).collect();
                (params, op.clone())
            })
            .collect();
        let implicit = binding.clone().unwrap_or_else(|| self.it());
        let with_binding: Vec<Bound> = std::iter::once(implicit).chain(bound_args.iter().cloned()).collect();
        let with_binding_types: Vec<_> = with_binding.iter().map(|a| a.type_ref.as_ref()).collect();
        let without_types: Vec<_> = bound_args.iter().map(|a| a.type_ref.as_ref()).collect();

        let bound_overloads = candidates
            .iter()
            .filter(|(_, op)| op.is_bound)
            .map(|(p, op)| (p.as_slice(), op.clone()));
        let resolution = match pick_overload(bound_overloads, &with_binding_types) {
            Resolution::NoMatch if binding.is_none() => pick_overload(
                candidates
                    .iter()
                    .filter(|(_, op)| !op.is_bound)
                    .map(|(p, op)| (p.as_slice(), op.clone())),
                &without_types,
            ),
            other => other,
        };
        let operation = match resolution {
            Resolution::Unique(op) => op,
            Resolution::Ambiguous => {
                return Err(BindError::AmbiguousFunction {
                    signature: signature(binding.as_ref(), &bound_args),
                });
            }
            Resolution::NoMatch => {
                return Err(BindError::FunctionNotFound {
                    signature: signature(binding.as_ref(), &bound_args),
                });
            }
        };
        let Some(return_type) = operation.return_type.clone() else {
            return Err(BindError::Unsupported(format!(
                "function `{name}` declares no return type"
            )));
        };
        let implementation = self.functions.get(&operation.full_name).ok_or_else(|| {
            BindError::Unsupported(format!("function `{name}` has no registered implementation"))
        })?;
        let args = if operation.is_bound { with_binding } else { bound_args };
        Ok(Bound::new(
            BoundKind::Call {
                function: BoundFunction::Custom(implementation),
                args,
            },
            Some(return_type),
        ))
    }
}
