//! The immutable, shareable schema model.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;

use crate::annotations::Annotations;
use crate::operations::Operation;
use crate::provider::EdmEntity;
use crate::types::{EnumMember, EnumType, PrimitiveKind, Property, StructuredType, TypeRef};

#[derive(Clone, Debug, PartialEq)]
pub struct EntitySet {
    pub name: Arc<str>,
    /// Qualified entity type name.
    pub entity_type: Arc<str>,
    pub annotations: Annotations,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Singleton {
    pub name: Arc<str>,
    pub entity_type: Arc<str>,
}

#[derive(Clone, Debug, Default)]
pub struct EntityContainer {
    pub name: Arc<str>,
    pub(crate) entity_sets: BTreeMap<Arc<str>, EntitySet>,
    pub(crate) singletons: BTreeMap<Arc<str>, Singleton>,
}

impl EntityContainer {
    #[must_use]
    pub fn entity_set(&self, name: &str) -> Option<&EntitySet> {
        self.entity_sets.get(name)
    }

    #[must_use]
    pub fn singleton(&self, name: &str) -> Option<&Singleton> {
        self.singletons.get(name)
    }

    pub fn entity_sets(&self) -> impl Iterator<Item = &EntitySet> {
        self.entity_sets.values()
    }
}

/// Read-only schema shared as `Arc<EdmModel>`.
///
/// Produced by [`crate::EdmModelBuilder::build`], which guarantees every base
/// type, property target and key reference resolves. The two internal caches
/// are filled lazily and are safe to populate from concurrent readers.
#[derive(Debug)]
pub struct EdmModel {
    pub(crate) structured: HashMap<Arc<str>, Arc<StructuredType>>,
    pub(crate) enums: HashMap<Arc<str>, Arc<EnumType>>,
    pub(crate) operations: HashMap<Arc<str>, Vec<Arc<Operation>>>,
    pub(crate) container: EntityContainer,
    pub(crate) rust_types: HashMap<TypeId, Arc<str>>,
    all_properties: DashMap<Arc<str>, Arc<[Property]>>,
    resolved_rust_types: DashMap<TypeId, Arc<str>>,
}

impl EdmModel {
    pub(crate) fn new(
        structured: HashMap<Arc<str>, Arc<StructuredType>>,
        enums: HashMap<Arc<str>, Arc<EnumType>>,
        operations: HashMap<Arc<str>, Vec<Arc<Operation>>>,
        container: EntityContainer,
        rust_types: HashMap<TypeId, Arc<str>>,
    ) -> Self {
        Self {
            structured,
            enums,
            operations,
            container,
            rust_types,
            all_properties: DashMap::new(),
            resolved_rust_types: DashMap::new(),
        }
    }

    #[must_use]
    pub fn container(&self) -> &EntityContainer {
        &self.container
    }

    #[must_use]
    pub fn entity_set(&self, name: &str) -> Option<&EntitySet> {
        self.container.entity_set(name)
    }

    #[must_use]
    pub fn singleton(&self, name: &str) -> Option<&Singleton> {
        self.container.singleton(name)
    }

    /// Structured type by qualified name, or by unqualified name when that is
    /// unambiguous.
    #[must_use]
    pub fn structured_type(&self, name: &str) -> Option<&Arc<StructuredType>> {
        if let Some(t) = self.structured.get(name) {
            return Some(t);
        }
        let mut found = self.structured.values().filter(|t| &*t.name == name);
        match (found.next(), found.next()) {
            (Some(t), None) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn enum_type(&self, name: &str) -> Option<&Arc<EnumType>> {
        if let Some(t) = self.enums.get(name) {
            return Some(t);
        }
        let mut found = self.enums.values().filter(|t| &*t.name == name);
        match (found.next(), found.next()) {
            (Some(t), None) => Some(t),
            _ => None,
        }
    }

    pub fn structured_types(&self) -> impl Iterator<Item = &Arc<StructuredType>> {
        self.structured.values()
    }

    /// Resolve a type name as written in a query: a primitive (`Edm.Int32`),
    /// enum, structured type or `Collection(...)`.
    #[must_use]
    pub fn resolve_type(&self, name: &str) -> Option<TypeRef> {
        let name = name.trim();
        if let Some(inner) = name
            .strip_prefix("Collection(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return self.resolve_type(inner).map(TypeRef::collection);
        }
        if let Some(t) = self.structured_type(name) {
            return Some(t.type_ref());
        }
        if let Some(e) = self.enum_type(name) {
            return Some(e.type_ref());
        }
        if name.contains('.') && !name.starts_with("Edm.") && !name.starts_with("edm.") {
            return None;
        }
        PrimitiveKind::from_name(name).map(TypeRef::primitive)
    }

    /// The type itself followed by its bases, most derived first.
    #[must_use]
    pub fn base_chain(&self, name: &str) -> Vec<&Arc<StructuredType>> {
        let mut chain = Vec::new();
        let mut current = self.structured_type(name);
        while let Some(t) = current {
            // Cycles are rejected at build time; the bound keeps lookups finite anyway.
            if chain.len() > self.structured.len() {
                break;
            }
            chain.push(t);
            current = t.base_type.as_deref().and_then(|b| self.structured.get(b));
        }
        chain
    }

    /// Property declared on `type_name` or any of its bases.
    #[must_use]
    pub fn find_property(&self, type_name: &str, property: &str) -> Option<&Property> {
        self.base_chain(type_name)
            .into_iter()
            .find_map(|t| t.declared_property(property))
    }

    /// Every property of `type_name`, base-type properties first.
    #[must_use]
    pub fn all_properties(&self, type_name: &str) -> Arc<[Property]> {
        if let Some(cached) = self.all_properties.get(type_name) {
            return cached.clone();
        }
        let chain = self.base_chain(type_name);
        let Some(head) = chain.first() else {
            return Arc::from(Vec::new());
        };
        let key = head.full_name.clone();
        let props: Arc<[Property]> = chain
            .iter()
            .rev()
            .flat_map(|t| t.properties.iter().cloned())
            .collect();
        self.all_properties.entry(key).or_insert(props).clone()
    }

    /// Effective key properties, inherited from the root of the hierarchy and
    /// ordered by explicit ordinal when one is present.
    #[must_use]
    pub fn keys(&self, type_name: &str) -> Vec<&Property> {
        let Some(owner) = self
            .base_chain(type_name)
            .into_iter()
            .rev()
            .find(|t| !t.keys.is_empty())
        else {
            return Vec::new();
        };
        let mut refs: Vec<_> = owner.keys.iter().enumerate().collect();
        refs.sort_by_key(|(pos, k)| (k.ordinal.unwrap_or(i32::MAX), *pos));
        refs.into_iter()
            .filter_map(|(_, k)| owner.declared_property(&k.name).or_else(|| self.find_property(&owner.full_name, &k.name)))
            .collect()
    }

    /// True when `derived` is `base` or inherits from it.
    #[must_use]
    pub fn is_assignable_to(&self, derived: &str, base: &str) -> bool {
        let Some(target) = self.structured_type(base) else {
            return false;
        };
        self.base_chain(derived)
            .iter()
            .any(|t| t.full_name == target.full_name)
    }

    /// Types that are `name` or derive from it.
    #[must_use]
    pub fn derived_types(&self, name: &str) -> Vec<&Arc<StructuredType>> {
        let mut out: Vec<_> = self
            .structured
            .values()
            .filter(|t| self.is_assignable_to(&t.full_name, name))
            .collect();
        out.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        out
    }

    #[must_use]
    pub fn enum_member(&self, enum_name: &str, member: &str) -> Option<&EnumMember> {
        self.enum_type(enum_name)?.member(member)
    }

    /// Overloads registered under a qualified operation name.
    #[must_use]
    pub fn operations(&self, full_name: &str) -> &[Arc<Operation>] {
        self.operations.get(full_name).map_or(&[], Vec::as_slice)
    }

    /// Functions (not actions) named `full_name`.
    pub fn functions<'a>(&'a self, full_name: &str) -> impl Iterator<Item = &'a Arc<Operation>> {
        self.operations(full_name).iter().filter(|o| o.is_function())
    }

    /// EDM type registered for the Rust type `T`.
    #[must_use]
    pub fn type_of<T: EdmEntity>(&self) -> Option<Arc<str>> {
        let id = TypeId::of::<T>();
        if let Some(hit) = self.resolved_rust_types.get(&id) {
            return Some(hit.clone());
        }
        let name = match self.rust_types.get(&id) {
            Some(n) => n.clone(),
            None => self.structured_type(T::EDM_TYPE)?.full_name.clone(),
        };
        self.resolved_rust_types.insert(id, name.clone());
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::EdmModelBuilder;

    fn model() -> Arc<EdmModel> {
        EdmModelBuilder::new("Ns")
            .add_structured_type(
                StructuredType::entity("Ns", "Person")
                    .with_property(Property::structural("Region", TypeRef::string().required()))
                    .with_property(Property::structural("Id", TypeRef::int32().required()))
                    .with_property(Property::structural("Name", TypeRef::string()))
                    .with_key_ordinal("Id", 1)
                    .with_key_ordinal("Region", 2),
            )
            .add_structured_type(
                StructuredType::entity("Ns", "Employee")
                    .with_base("Ns.Person")
                    .with_property(Property::structural("Salary", TypeRef::primitive(PrimitiveKind::Decimal))),
            )
            .add_entity_set("People", "Ns.Person")
            .build()
            .unwrap()
    }

    #[test]
    fn keys_follow_ordinals_and_inherit() {
        let m = model();
        let names: Vec<_> = m.keys("Ns.Employee").iter().map(|p| p.name.to_string()).collect();
        assert_eq!(names, ["Id", "Region"]);
    }

    #[test]
    fn properties_walk_base_chain() {
        let m = model();
        assert!(m.find_property("Ns.Employee", "Name").is_some());
        assert!(m.find_property("Ns.Person", "Salary").is_none());
        let all = m.all_properties("Ns.Employee");
        assert_eq!(&*all[0].name, "Region");
        assert_eq!(&*all[all.len() - 1].name, "Salary");
        // second call served from the cache
        assert!(Arc::ptr_eq(&all, &m.all_properties("Ns.Employee")));
    }

    #[test]
    fn assignability_and_lookup() {
        let m = model();
        assert!(m.is_assignable_to("Ns.Employee", "Ns.Person"));
        assert!(!m.is_assignable_to("Ns.Person", "Ns.Employee"));
        assert!(m.structured_type("Employee").is_some());
        assert_eq!(m.derived_types("Ns.Person").len(), 2);
        assert_eq!(
            m.resolve_type("Collection(Edm.Int32)"),
            Some(TypeRef::collection(TypeRef::int32()))
        );
        assert_eq!(m.resolve_type("Ns.Nope"), None);
        assert_eq!(m.entity_set("People").map(|s| &*s.entity_type), Some("Ns.Person"));
    }
}
