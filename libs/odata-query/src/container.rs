//! Projected instances: named properties produced by `$select`/`$expand`.

use std::fmt;
use std::sync::{Arc, OnceLock};

use heck::ToLowerCamelCase;
use odata_edm::Value;
use serde_json::{Map, Value as Json};

use crate::apply::project::Projector;
use crate::compile::CompiledExpansion;
use crate::error::ExecutionError;
use crate::truncated::TruncatedCollection;

/// Renames properties when containers are turned into JSON.
pub trait PropertyNameMapper: Send + Sync {
    fn map_name(&self, name: &str) -> String;
}

/// Keeps model names as they are.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityNameMapper;

impl PropertyNameMapper for IdentityNameMapper {
    fn map_name(&self, name: &str) -> String {
        name.to_owned()
    }
}

/// `UnitPrice` becomes `unitPrice`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CamelCaseNameMapper;

impl PropertyNameMapper for CamelCaseNameMapper {
    fn map_name(&self, name: &str) -> String {
        name.to_lower_camel_case()
    }
}

/// One projected instance.
#[derive(Clone, Debug)]
pub struct PropertyContainer {
    type_name: Arc<str>,
    properties: Vec<NamedProperty>,
}

#[derive(Clone, Debug)]
pub struct NamedProperty {
    pub name: Arc<str>,
    pub value: ProjectedValue,
    /// Present because it is a key or `AutoSelect`/`AutoExpand`, not requested.
    pub auto_selected: bool,
}

#[derive(Clone, Debug)]
pub enum ProjectedValue {
    Value(Value),
    /// Sub-selected complex value or expanded single-valued navigation.
    Nested(Box<PropertyContainer>),
    /// Expanded single-valued navigation that resolved to nothing.
    NullNavigation,
    /// Expanded collection-valued navigation.
    Collection(TruncatedCollection<PropertyContainer>),
    Deferred(Arc<DeferredExpansion>),
}

impl ProjectedValue {
    /// The value with deferred expansions forced.
    ///
    /// # Errors
    /// Returns the [`ExecutionError`] a deferred expansion failed with.
    pub fn resolved(&self) -> Result<&ProjectedValue, ExecutionError> {
        match self {
            ProjectedValue::Deferred(d) => d.resolve(),
            other => Ok(other),
        }
    }

    #[must_use]
    pub const fn as_value(&self) -> Option<&Value> {
        match self {
            ProjectedValue::Value(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_nested(&self) -> Option<&PropertyContainer> {
        match self {
            ProjectedValue::Nested(c) => Some(c),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_collection(&self) -> Option<&TruncatedCollection<PropertyContainer>> {
        match self {
            ProjectedValue::Collection(c) => Some(c),
            _ => None,
        }
    }
}

/// Expansion evaluated on first access, at most once.
pub struct DeferredExpansion {
    source: Value,
    expansion: Arc<CompiledExpansion>,
    projector: Projector,
    cell: OnceLock<Result<ProjectedValue, ExecutionError>>,
}

impl fmt::Debug for DeferredExpansion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredExpansion")
            .field("name", &self.expansion.name)
            .field("resolved", &self.is_resolved())
            .finish_non_exhaustive()
    }
}

impl DeferredExpansion {
    pub(crate) fn new(source: Value, expansion: Arc<CompiledExpansion>, projector: Projector) -> Self {
        Self {
            source,
            expansion,
            projector,
            cell: OnceLock::new(),
        }
    }

    /// Evaluate the expansion, or return the memoized outcome.
    ///
    /// # Errors
    /// Returns the [`ExecutionError`] the expansion produced.
    pub fn resolve(&self) -> Result<&ProjectedValue, ExecutionError> {
        self.cell
            .get_or_init(|| self.projector.expand(&self.source, &self.expansion))
            .as_ref()
            .map_err(Clone::clone)
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl PropertyContainer {
    #[must_use]
    pub fn new(type_name: Arc<str>) -> Self {
        Self {
            type_name,
            properties: Vec::new(),
        }
    }

    pub fn push(&mut self, name: Arc<str>, value: ProjectedValue, auto_selected: bool) {
        self.properties.push(NamedProperty {
            name,
            value,
            auto_selected,
        });
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn properties(&self) -> &[NamedProperty] {
        &self.properties
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.properties.iter().map(|p| p.name.as_ref()).collect()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProjectedValue> {
        self.properties
            .iter()
            .find(|p| p.name.as_ref() == name)
            .map(|p| &p.value)
    }

    /// Plain value of `name`, when it holds one.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(ProjectedValue::as_value)
    }

    #[must_use]
    pub fn is_auto_selected(&self, name: &str) -> bool {
        self.properties
            .iter()
            .any(|p| p.name.as_ref() == name && p.auto_selected)
    }

    /// Render as a JSON object, forcing deferred expansions.
    ///
    /// # Errors
    /// Returns the [`ExecutionError`] of a failed deferred expansion.
    pub fn to_json(&self, mapper: &dyn PropertyNameMapper) -> Result<Json, ExecutionError> {
        let mut map = Map::new();
        for p in &self.properties {
            let name = mapper.map_name(&p.name);
            let json = match p.value.resolved()? {
                ProjectedValue::Value(v) => value_json(v, mapper),
                ProjectedValue::Nested(c) => c.to_json(mapper)?,
                ProjectedValue::NullNavigation => Json::Null,
                ProjectedValue::Collection(items) => {
                    if let Some(count) = items.total_count() {
                        map.insert(format!("{name}@odata.count"), Json::from(count));
                    }
                    Json::Array(
                        items
                            .iter()
                            .map(|c| c.to_json(mapper))
                            .collect::<Result<_, _>>()?,
                    )
                }
                ProjectedValue::Deferred(_) => Json::Null,
            };
            map.insert(name, json);
        }
        Ok(Json::Object(map))
    }
}

/// Plain values keep their JSON form; record keys go through `mapper`.
fn value_json(v: &Value, mapper: &dyn PropertyNameMapper) -> Json {
    match v {
        Value::Record(r) => Json::Object(
            r.properties()
                .map(|(k, v)| (mapper.map_name(k), value_json(v, mapper)))
                .collect(),
        ),
        Value::Collection(items) => Json::Array(items.iter().map(|i| value_json(i, mapper)).collect()),
        other => other.to_json(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odata_edm::Record;
    use serde_json::json;

    #[test]
    fn camel_case_applies_only_when_rendering() {
        let mut order = PropertyContainer::new("Ns.Order".into());
        order.push("OrderId".into(), ProjectedValue::Value(Value::Int(7)), true);
        let mut c = PropertyContainer::new("Ns.Customer".into());
        c.push("Id".into(), ProjectedValue::Value(Value::Int(1)), true);
        c.push(
            "HomeAddress".into(),
            ProjectedValue::Value(Record::new("Ns.Address").with("ZipCode", "123").into()),
            false,
        );
        c.push("BestFriend".into(), ProjectedValue::NullNavigation, false);
        c.push(
            "Orders".into(),
            ProjectedValue::Collection(TruncatedCollection::unbounded([order]).with_total_count(1)),
            false,
        );

        assert_eq!(c.names(), vec!["Id", "HomeAddress", "BestFriend", "Orders"]);
        assert!(c.is_auto_selected("Id"));
        assert!(!c.is_auto_selected("HomeAddress"));
        assert_eq!(
            c.to_json(&CamelCaseNameMapper).unwrap(),
            json!({
                "id": 1,
                "homeAddress": {"zipCode": "123"},
                "bestFriend": null,
                "orders@odata.count": 1,
                "orders": [{"orderId": 7}],
            })
        );
        assert_eq!(c.to_json(&IdentityNameMapper).unwrap()["HomeAddress"]["ZipCode"], "123");
    }
}
