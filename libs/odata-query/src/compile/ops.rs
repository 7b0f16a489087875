//! Runtime semantics of operators and canonical functions.

use std::cmp::Ordering;

use bigdecimal::{BigDecimal, RoundingMode, Zero};
use chrono::{DateTime, Datelike, Timelike, Utc};
use odata_edm::{PrimitiveKind, Value};

use crate::bind::functions::Canonical;
use crate::error::ExecutionError;
use crate::syntax::ast::BinaryOp;

fn type_error(op: &str, l: &Value, r: &Value) -> ExecutionError {
    ExecutionError::TypeError(format!(
        "`{op}` cannot combine {} and {}",
        l.kind_name(),
        r.kind_name()
    ))
}

fn overflow(op: &str) -> ExecutionError {
    ExecutionError::Arithmetic(format!("overflow in `{op}`"))
}

/// Relational comparison; any null operand yields `false`.
pub(crate) fn compare(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, ExecutionError> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(l.equals(r))),
        BinaryOp::Ne => return Ok(Value::Bool(!l.equals(r))),
        _ => {}
    }
    if l.is_null() || r.is_null() {
        return Ok(Value::Bool(false));
    }
    let ord = l
        .compare(r)
        .ok_or_else(|| type_error(op.keyword(), l, r))?;
    Ok(Value::Bool(match op {
        BinaryOp::Gt => ord == Ordering::Greater,
        BinaryOp::Ge => ord != Ordering::Less,
        BinaryOp::Lt => ord == Ordering::Less,
        BinaryOp::Le => ord != Ordering::Greater,
        _ => return Err(type_error(op.keyword(), l, r)),
    }))
}

pub(crate) fn has_flag(l: &Value, r: &Value) -> Result<Value, ExecutionError> {
    match (l, r) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Bool(false)),
        (Value::Enum(a), Value::Enum(b)) => Ok(Value::Bool(a.value & b.value == b.value)),
        _ => Err(type_error("has", l, r)),
    }
}

/// Arithmetic on numeric and temporal operands; `null` in, `null` out.
pub(crate) fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, ExecutionError> {
    use Value as V;
    if l.is_null() || r.is_null() {
        return Ok(V::Null);
    }
    let name = op.keyword();
    match (l, r) {
        (V::Int(a), V::Int(b)) => {
            let (a, b) = (*a, *b);
            match op {
                BinaryOp::Add => a.checked_add(b).map(V::Int).ok_or_else(|| overflow(name)),
                BinaryOp::Sub => a.checked_sub(b).map(V::Int).ok_or_else(|| overflow(name)),
                BinaryOp::Mul => a.checked_mul(b).map(V::Int).ok_or_else(|| overflow(name)),
                BinaryOp::Div | BinaryOp::Mod if b == 0 => {
                    Err(ExecutionError::Arithmetic("division by zero".to_owned()))
                }
                BinaryOp::Div => a.checked_div(b).map(V::Int).ok_or_else(|| overflow(name)),
                BinaryOp::Mod => a.checked_rem(b).map(V::Int).ok_or_else(|| overflow(name)),
                BinaryOp::DivBy => decimal_op(op, &BigDecimal::from(a), &BigDecimal::from(b)),
                _ => Err(type_error(name, l, r)),
            }
        }
        (a, b) if a.is_numeric() && b.is_numeric() => {
            if matches!(a, V::Double(_)) || matches!(b, V::Double(_)) {
                let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                    return Err(type_error(name, l, r));
                };
                Ok(V::Double(match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div | BinaryOp::DivBy => a / b,
                    BinaryOp::Mod => a % b,
                    _ => return Err(type_error(name, l, r)),
                }))
            } else {
                let (Some(a), Some(b)) = (a.as_decimal(), b.as_decimal()) else {
                    return Err(type_error(name, l, r));
                };
                decimal_op(op, &a, &b)
            }
        }
        _ => temporal(op, l, r),
    }
}

fn decimal_op(op: BinaryOp, a: &BigDecimal, b: &BigDecimal) -> Result<Value, ExecutionError> {
    let divides = matches!(op, BinaryOp::Div | BinaryOp::DivBy | BinaryOp::Mod);
    if divides && b.is_zero() {
        return Err(ExecutionError::Arithmetic("division by zero".to_owned()));
    }
    Ok(Value::Decimal(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::DivBy => a / b,
        BinaryOp::Mod => a % b,
        _ => {
            return Err(ExecutionError::TypeError(format!(
                "`{}` is not arithmetic",
                op.keyword()
            )));
        }
    }))
}

fn temporal(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, ExecutionError> {
    use Value as V;
    let name = op.keyword();
    let add = op == BinaryOp::Add;
    match (op, l, r) {
        (BinaryOp::Add | BinaryOp::Sub, V::DateTimeOffset(a), V::Duration(d)) => {
            let d = if add { *d } else { -*d };
            a.checked_add_signed(d)
                .map(V::DateTimeOffset)
                .ok_or_else(|| overflow(name))
        }
        (BinaryOp::Add | BinaryOp::Sub, V::Date(a), V::Duration(d)) => {
            let d = if add { *d } else { -*d };
            a.checked_add_signed(d).map(V::Date).ok_or_else(|| overflow(name))
        }
        (BinaryOp::Add, V::Duration(a), V::Duration(b)) => {
            a.checked_add(b).map(V::Duration).ok_or_else(|| overflow(name))
        }
        (BinaryOp::Sub, V::Duration(a), V::Duration(b)) => {
            a.checked_sub(b).map(V::Duration).ok_or_else(|| overflow(name))
        }
        (BinaryOp::Sub, V::DateTimeOffset(a), V::DateTimeOffset(b)) => {
            Ok(V::Duration(a.signed_duration_since(*b)))
        }
        (BinaryOp::Sub, V::Date(a), V::Date(b)) => Ok(V::Duration(a.signed_duration_since(*b))),
        _ => Err(type_error(name, l, r)),
    }
}

pub(crate) fn negate(v: &Value) -> Result<Value, ExecutionError> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(|| overflow("-")),
        Value::Double(d) => Ok(Value::Double(-d)),
        Value::Decimal(d) => Ok(Value::Decimal(-d)),
        Value::Duration(d) => Ok(Value::Duration(-*d)),
        other => Err(ExecutionError::TypeError(format!(
            "cannot negate {}",
            other.kind_name()
        ))),
    }
}

/// Whether a runtime value is an instance of the primitive kind.
pub(crate) fn is_primitive_of(v: &Value, kind: PrimitiveKind) -> bool {
    use PrimitiveKind as P;
    match v {
        Value::Bool(_) => kind == P::Boolean,
        Value::Int(i) => match kind {
            P::Byte => u8::try_from(*i).is_ok(),
            P::SByte => i8::try_from(*i).is_ok(),
            P::Int16 => i16::try_from(*i).is_ok(),
            P::Int32 => i32::try_from(*i).is_ok(),
            P::Int64 => true,
            _ => false,
        },
        Value::Double(_) => matches!(kind, P::Double | P::Single),
        Value::Decimal(_) => kind == P::Decimal,
        Value::String(_) => kind == P::String,
        Value::Guid(_) => kind == P::Guid,
        Value::DateTimeOffset(_) => kind == P::DateTimeOffset,
        Value::Date(_) => kind == P::Date,
        Value::TimeOfDay(_) => kind == P::TimeOfDay,
        Value::Duration(_) => kind == P::Duration,
        _ => false,
    }
}

/// Integer part of `d`, or `None` when it falls outside `i64`.
#[allow(clippy::cast_possible_truncation)]
fn truncate_to_i64(d: f64) -> Option<i64> {
    // 2^63, exact in f64
    const BOUND: f64 = 9_223_372_036_854_775_808.0;
    let t = d.trunc();
    if (-BOUND..BOUND).contains(&t) {
        Some(t as i64)
    } else {
        None
    }
}

/// Primitive conversion for `cast`; `null` when the value does not convert.
pub(crate) fn cast_primitive(v: &Value, kind: PrimitiveKind) -> Value {
    use PrimitiveKind as P;
    if v.is_null() || is_primitive_of(v, kind) {
        return v.clone();
    }
    match kind {
        P::String => Value::String(match v {
            Value::String(s) => s.clone(),
            Value::Enum(e) => e.member.to_string(),
            other => other.to_json().as_str().map_or_else(|| other.to_literal(), str::to_owned),
        }),
        P::Byte | P::SByte | P::Int16 | P::Int32 | P::Int64 => {
            let i = match v {
                Value::Double(d) => truncate_to_i64(*d),
                Value::Decimal(d) => Value::Decimal(d.with_scale_round(0, RoundingMode::Down)).as_i64(),
                Value::Enum(e) => Some(e.value),
                _ => None,
            };
            i.map(Value::Int)
                .filter(|i| is_primitive_of(i, kind))
                .unwrap_or(Value::Null)
        }
        P::Decimal => v.as_decimal().map_or(Value::Null, Value::Decimal),
        P::Double | P::Single => v.as_f64().map_or(Value::Null, Value::Double),
        _ => Value::Null,
    }
}

fn int(i: impl Into<i64>) -> Value {
    Value::Int(i.into())
}

fn arg_error(f: Canonical, args: &[Value]) -> ExecutionError {
    let kinds: Vec<_> = args.iter().map(Value::kind_name).collect();
    ExecutionError::TypeError(format!("{}({}) is not defined", f.name(), kinds.join(",")))
}

fn char_index(s: &str, byte: usize) -> i64 {
    i64::try_from(s[..byte].chars().count()).unwrap_or(i64::MAX)
}

fn substring(s: &str, start: i64, len: Option<i64>) -> String {
    let start = usize::try_from(start.max(0)).unwrap_or(usize::MAX);
    let chars = s.chars().skip(start);
    match len {
        Some(n) => chars.take(usize::try_from(n.max(0)).unwrap_or(0)).collect(),
        None => chars.collect(),
    }
}

fn round(f: Canonical, v: &Value) -> Option<Value> {
    let mode = match f {
        Canonical::Round => RoundingMode::HalfUp,
        Canonical::Floor => RoundingMode::Floor,
        _ => RoundingMode::Ceiling,
    };
    Some(match v {
        Value::Double(d) => Value::Double(match f {
            Canonical::Round => d.round(),
            Canonical::Floor => d.floor(),
            _ => d.ceil(),
        }),
        Value::Int(_) | Value::Decimal(_) => Value::Decimal(v.as_decimal()?.with_scale_round(0, mode)),
        _ => return None,
    })
}

fn datetime_part(f: Canonical, v: &Value) -> Option<Value> {
    Some(match (f, v) {
        (Canonical::Year, Value::DateTimeOffset(d)) => int(d.year()),
        (Canonical::Year, Value::Date(d)) => int(d.year()),
        (Canonical::Month, Value::DateTimeOffset(d)) => int(d.month()),
        (Canonical::Month, Value::Date(d)) => int(d.month()),
        (Canonical::Day, Value::DateTimeOffset(d)) => int(d.day()),
        (Canonical::Day, Value::Date(d)) => int(d.day()),
        (Canonical::Hour, Value::DateTimeOffset(d)) => int(d.hour()),
        (Canonical::Hour, Value::TimeOfDay(t)) => int(t.hour()),
        (Canonical::Minute, Value::DateTimeOffset(d)) => int(d.minute()),
        (Canonical::Minute, Value::TimeOfDay(t)) => int(t.minute()),
        (Canonical::Second, Value::DateTimeOffset(d)) => int(d.second()),
        (Canonical::Second, Value::TimeOfDay(t)) => int(t.second()),
        (Canonical::FractionalSeconds, Value::DateTimeOffset(d)) => {
            Value::Decimal(BigDecimal::new(d.nanosecond().into(), 9).normalized())
        }
        (Canonical::FractionalSeconds, Value::TimeOfDay(t)) => {
            Value::Decimal(BigDecimal::new(t.nanosecond().into(), 9).normalized())
        }
        (Canonical::Date, Value::DateTimeOffset(d)) => Value::Date(d.date_naive()),
        (Canonical::Time, Value::DateTimeOffset(d)) => Value::TimeOfDay(d.time()),
        (Canonical::TotalOffsetMinutes, Value::DateTimeOffset(_)) => Value::Int(0),
        _ => return None,
    })
}

/// Evaluate a canonical function. A `null` argument yields `null`.
pub(crate) fn call_canonical(f: Canonical, args: &[Value]) -> Result<Value, ExecutionError> {
    match f {
        Canonical::Now => return Ok(Value::DateTimeOffset(Utc::now())),
        Canonical::MinDateTime => return Ok(Value::DateTimeOffset(DateTime::<Utc>::MIN_UTC)),
        Canonical::MaxDateTime => return Ok(Value::DateTimeOffset(DateTime::<Utc>::MAX_UTC)),
        _ => {}
    }
    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    let s = |i: usize| args.get(i).and_then(Value::as_str);
    let n = |i: usize| args.get(i).and_then(Value::as_i64);
    let out = match f {
        Canonical::Contains => s(0).zip(s(1)).map(|(a, b)| Value::Bool(a.contains(b))),
        Canonical::StartsWith => s(0).zip(s(1)).map(|(a, b)| Value::Bool(a.starts_with(b))),
        Canonical::EndsWith => s(0).zip(s(1)).map(|(a, b)| Value::Bool(a.ends_with(b))),
        Canonical::Length => s(0).map(|a| Value::Int(i64::try_from(a.chars().count()).unwrap_or(i64::MAX))),
        Canonical::IndexOf => s(0)
            .zip(s(1))
            .map(|(a, b)| Value::Int(a.find(b).map_or(-1, |i| char_index(a, i)))),
        Canonical::Substring => match (s(0), n(1), args.len()) {
            (Some(a), Some(start), 2) => Some(Value::String(substring(a, start, None))),
            (Some(a), Some(start), 3) => n(2).map(|len| Value::String(substring(a, start, Some(len)))),
            _ => None,
        },
        Canonical::ToLower => s(0).map(|a| Value::String(a.to_lowercase())),
        Canonical::ToUpper => s(0).map(|a| Value::String(a.to_uppercase())),
        Canonical::Trim => s(0).map(|a| Value::String(a.trim().to_owned())),
        Canonical::Concat => s(0).zip(s(1)).map(|(a, b)| Value::String(format!("{a}{b}"))),
        Canonical::Round | Canonical::Floor | Canonical::Ceiling => args.first().and_then(|v| round(f, v)),
        _ => args.first().and_then(|v| datetime_part(f, v)),
    };
    out.ok_or_else(|| arg_error(f, args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use std::str::FromStr;

    fn dec(s: &str) -> Value {
        Value::Decimal(BigDecimal::from_str(s).unwrap())
    }

    #[test]
    fn integer_arithmetic_is_checked() {
        assert_eq!(arithmetic(BinaryOp::Div, &Value::Int(7), &Value::Int(2)).unwrap(), Value::Int(3));
        assert!(matches!(
            arithmetic(BinaryOp::Add, &Value::Int(i64::MAX), &Value::Int(1)),
            Err(ExecutionError::Arithmetic(_))
        ));
        assert!(matches!(
            arithmetic(BinaryOp::Mod, &Value::Int(1), &Value::Int(0)),
            Err(ExecutionError::Arithmetic(_))
        ));
        assert_eq!(
            arithmetic(BinaryOp::DivBy, &Value::Int(7), &Value::Int(2)).unwrap(),
            dec("3.5")
        );
    }

    #[test]
    fn mixed_numeric_promotes() {
        assert_eq!(arithmetic(BinaryOp::Add, &Value::Int(1), &dec("0.5")).unwrap(), dec("1.5"));
        assert_eq!(
            arithmetic(BinaryOp::Mul, &Value::Double(1.5), &Value::Int(2)).unwrap(),
            Value::Double(3.0)
        );
        assert_eq!(arithmetic(BinaryOp::Add, &Value::Null, &Value::Int(2)).unwrap(), Value::Null);
    }

    #[test]
    fn temporal_arithmetic() {
        let t = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().to_utc();
        let later = arithmetic(BinaryOp::Add, &Value::DateTimeOffset(t), &Value::Duration(TimeDelta::hours(2))).unwrap();
        assert_eq!(
            arithmetic(BinaryOp::Sub, &later, &Value::DateTimeOffset(t)).unwrap(),
            Value::Duration(TimeDelta::hours(2))
        );
    }

    #[test]
    fn comparisons_with_null_are_false() {
        assert_eq!(compare(BinaryOp::Gt, &Value::Null, &Value::Int(1)).unwrap(), Value::Bool(false));
        assert_eq!(compare(BinaryOp::Eq, &Value::Null, &Value::Null).unwrap(), Value::Bool(true));
        assert_eq!(compare(BinaryOp::Ne, &Value::Int(1), &Value::Null).unwrap(), Value::Bool(true));
        assert!(compare(BinaryOp::Lt, &Value::from("a"), &Value::Int(1)).is_err());
    }

    #[test]
    fn string_functions_count_chars() {
        let s = Value::from("héllo");
        assert_eq!(call_canonical(Canonical::Length, &[s.clone()]).unwrap(), Value::Int(5));
        assert_eq!(
            call_canonical(Canonical::IndexOf, &[s.clone(), Value::from("l")]).unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            call_canonical(Canonical::Substring, &[s.clone(), Value::Int(1), Value::Int(3)]).unwrap(),
            Value::from("éll")
        );
        assert_eq!(
            call_canonical(Canonical::Contains, &[Value::Null, Value::from("x")]).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(call_canonical(Canonical::Round, &[dec("2.5")]).unwrap(), dec("3"));
        assert_eq!(call_canonical(Canonical::Floor, &[dec("-2.5")]).unwrap(), dec("-3"));
        assert_eq!(call_canonical(Canonical::Ceiling, &[Value::Double(1.2)]).unwrap(), Value::Double(2.0));
    }

    #[test]
    fn casts() {
        assert_eq!(cast_primitive(&Value::Double(3.9), PrimitiveKind::Int32), Value::Int(3));
        assert_eq!(cast_primitive(&Value::Int(300), PrimitiveKind::Byte), Value::Null);
        assert_eq!(cast_primitive(&Value::Double(1e20), PrimitiveKind::Int64), Value::Null);
        assert_eq!(cast_primitive(&Value::Double(-1e20), PrimitiveKind::Int64), Value::Null);
        assert_eq!(cast_primitive(&Value::Double(f64::NAN), PrimitiveKind::Int64), Value::Null);
        assert_eq!(cast_primitive(&Value::Double(-2.7), PrimitiveKind::Int64), Value::Int(-2));
        assert_eq!(cast_primitive(&Value::Int(3), PrimitiveKind::String), Value::from("3"));
        assert!(is_primitive_of(&Value::Int(3), PrimitiveKind::Int16));
    }
}
