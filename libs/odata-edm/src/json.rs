//! Coercion of JSON documents into typed records.

use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::error::ModelError;
use crate::model::EdmModel;
use crate::types::{PrimitiveKind, TypeKind, TypeRef};
use crate::value::{parse_duration, EnumValue, Record, Value};

const TYPE_ANNOTATION: &str = "@odata.type";

impl Record {
    /// Build a record of `type_name` from a JSON object, converting every
    /// declared property to its EDM type.
    ///
    /// An `@odata.type` member (`#Ns.Derived`) selects a derived type. Unknown
    /// members are kept as dynamic properties on open types and rejected on
    /// closed ones.
    ///
    /// # Errors
    /// Returns [`ModelError`] when the type is unknown, a member is not
    /// declared on a closed type, or a value cannot be converted.
    pub fn from_json(model: &EdmModel, type_name: &str, json: &Json) -> Result<Self, ModelError> {
        coerce_record(model, type_name, json, type_name)
    }
}

fn mismatch(path: &str, expected: impl ToString, found: &Json) -> ModelError {
    let found = match found {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    };
    ModelError::Coercion {
        path: path.to_owned(),
        expected: expected.to_string(),
        found: found.to_owned(),
    }
}

fn coerce_record(
    model: &EdmModel,
    type_name: &str,
    json: &Json,
    path: &str,
) -> Result<Record, ModelError> {
    let Json::Object(map) = json else {
        return Err(mismatch(path, type_name, json));
    };
    let declared = model
        .structured_type(type_name)
        .ok_or_else(|| ModelError::UnknownStructuredType(type_name.to_owned()))?;
    let actual = match map.get(TYPE_ANNOTATION).and_then(Json::as_str) {
        Some(t) => {
            let t = t.trim_start_matches('#');
            if !model.is_assignable_to(t, &declared.full_name) {
                return Err(mismatch(path, &declared.full_name, json));
            }
            model
                .structured_type(t)
                .ok_or_else(|| ModelError::UnknownStructuredType(t.to_owned()))?
        }
        None => declared,
    };

    let mut record = Record::new(actual.full_name.clone());
    for (name, raw) in map {
        if name.starts_with('@') {
            continue;
        }
        let child_path = format!("{path}/{name}");
        match model.find_property(&actual.full_name, name) {
            Some(p) => {
                let v = coerce(model, &p.type_ref, raw, &child_path)?;
                record.set(p.name.clone(), v);
            }
            None if actual.is_open => record.set(name.as_str(), infer(raw)),
            None => {
                return Err(ModelError::UnknownProperty {
                    type_name: actual.full_name.to_string(),
                    property: name.clone(),
                });
            }
        }
    }
    Ok(record)
}

fn coerce(model: &EdmModel, t: &TypeRef, json: &Json, path: &str) -> Result<Value, ModelError> {
    if json.is_null() {
        return Ok(Value::Null);
    }
    match &t.kind {
        TypeKind::Collection(inner) => {
            let Json::Array(items) = json else {
                return Err(mismatch(path, t, json));
            };
            let values = items
                .iter()
                .map(|item| coerce(model, inner, item, path))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::from(values))
        }
        TypeKind::Complex(name) | TypeKind::Entity(name) => {
            Ok(Value::from(coerce_record(model, name, json, path)?))
        }
        TypeKind::Enum(name) => {
            let enum_type = model
                .enum_type(name)
                .ok_or_else(|| mismatch(path, t, json))?;
            let member = match json {
                Json::String(s) => enum_type.member(s),
                Json::Number(n) => n.as_i64().and_then(|v| enum_type.member_by_value(v)),
                _ => None,
            }
            .ok_or_else(|| mismatch(path, t, json))?;
            Ok(Value::Enum(EnumValue {
                type_name: enum_type.full_name.clone(),
                member: member.name.clone(),
                value: member.value,
            }))
        }
        TypeKind::Primitive(kind) => {
            primitive(*kind, json).ok_or_else(|| mismatch(path, t, json))
        }
    }
}

fn primitive(kind: PrimitiveKind, json: &Json) -> Option<Value> {
    use PrimitiveKind as K;
    let text = json.as_str();
    Some(match kind {
        K::Boolean => Value::Bool(json.as_bool()?),
        K::Byte | K::SByte | K::Int16 | K::Int32 | K::Int64 => Value::Int(json.as_i64()?),
        K::Single | K::Double => match json {
            Json::Number(n) => Value::Double(n.as_f64()?),
            Json::String(s) => Value::Double(match s.as_str() {
                "INF" => f64::INFINITY,
                "-INF" => f64::NEG_INFINITY,
                "NaN" => f64::NAN,
                _ => return None,
            }),
            _ => return None,
        },
        K::Decimal => match json {
            Json::Number(n) => Value::Decimal(BigDecimal::from_str(&n.to_string()).ok()?),
            Json::String(s) => Value::Decimal(BigDecimal::from_str(s).ok()?),
            _ => return None,
        },
        K::String => Value::String(text?.to_owned()),
        K::Guid => Value::Guid(Uuid::parse_str(text?).ok()?),
        K::DateTimeOffset => {
            Value::DateTimeOffset(DateTime::parse_from_rfc3339(text?).ok()?.with_timezone(&Utc))
        }
        K::Date => Value::Date(NaiveDate::parse_from_str(text?, "%Y-%m-%d").ok()?),
        K::TimeOfDay => Value::TimeOfDay(NaiveTime::from_str(text?).ok()?),
        K::Duration => Value::Duration(parse_duration(text?)?),
    })
}

/// Best-effort value for a dynamic property of an open type.
fn infer(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Double))
            .unwrap_or(Value::Null),
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::from(items.iter().map(infer).collect::<Vec<_>>()),
        Json::Object(map) => {
            let mut r = Record::new(Arc::<str>::from("Edm.Untyped"));
            for (k, v) in map {
                r.set(k.as_str(), infer(v));
            }
            Value::from(r)
        }
    }
}
