//! Model view used while binding: the shared [`EdmModel`] plus the types
//! `$compute` and `$apply` synthesize for one request.

use std::collections::HashMap;
use std::sync::Arc;

use odata_edm::{EdmModel, Property, StructuredType, TypeRef};

/// Suffix of the type `$compute` derives from the element type.
const COMPUTE_SUFFIX: &str = "@compute";

#[derive(Clone, Debug)]
pub struct Schema {
    model: Arc<EdmModel>,
    overlays: HashMap<Arc<str>, Arc<StructuredType>>,
    computed: Vec<Arc<str>>,
}

impl Schema {
    #[must_use]
    pub fn new(model: Arc<EdmModel>) -> Self {
        Self {
            model,
            overlays: HashMap::new(),
            computed: Vec::new(),
        }
    }

    #[must_use]
    pub fn model(&self) -> &Arc<EdmModel> {
        &self.model
    }

    /// Structured type by name, synthesized types first.
    #[must_use]
    pub fn structured(&self, name: &str) -> Option<Arc<StructuredType>> {
        self.overlays
            .get(name)
            .cloned()
            .or_else(|| self.model.structured_type(name).cloned())
    }

    #[must_use]
    pub fn is_synthesized(&self, name: &str) -> bool {
        self.overlays.contains_key(name)
    }

    /// The type itself followed by its bases, most derived first.
    #[must_use]
    pub fn base_chain(&self, name: &str) -> Vec<Arc<StructuredType>> {
        let mut chain = Vec::new();
        let mut current = self.structured(name);
        while let Some(t) = current {
            if chain.len() > self.overlays.len() + self.model.structured_types().count() {
                break;
            }
            current = t.base_type.as_deref().and_then(|b| self.structured(b));
            chain.push(t);
        }
        chain
    }

    #[must_use]
    pub fn find_property(&self, type_name: &str, property: &str) -> Option<Property> {
        self.base_chain(type_name)
            .iter()
            .find_map(|t| t.declared_property(property).cloned())
    }

    /// All properties, base-type properties first.
    #[must_use]
    pub fn all_properties(&self, type_name: &str) -> Vec<Property> {
        if !self.overlays.contains_key(type_name) {
            return self.model.all_properties(type_name).to_vec();
        }
        self.base_chain(type_name)
            .iter()
            .rev()
            .flat_map(|t| t.properties.iter().cloned())
            .collect()
    }

    /// Names of properties every projection of `type_name` would list
    /// without `$select`; computed aliases are excluded.
    #[must_use]
    pub fn default_properties(&self, type_name: &str) -> Vec<Property> {
        self.all_properties(type_name)
            .into_iter()
            .filter(|p| !p.is_navigation() && !self.computed.contains(&p.name))
            .collect()
    }

    #[must_use]
    pub fn keys(&self, type_name: &str) -> Vec<Property> {
        let chain = self.base_chain(type_name);
        let Some(owner) = chain.iter().rev().find(|t| !t.keys.is_empty()) else {
            return Vec::new();
        };
        if !self.overlays.contains_key(&owner.full_name) {
            return self
                .model
                .keys(&owner.full_name)
                .into_iter()
                .cloned()
                .collect();
        }
        owner
            .keys
            .iter()
            .filter_map(|k| owner.declared_property(&k.name).cloned())
            .collect()
    }

    #[must_use]
    pub fn is_open(&self, type_name: &str) -> bool {
        self.base_chain(type_name).iter().any(|t| t.is_open)
    }

    #[must_use]
    pub fn is_assignable_to(&self, derived: &str, base: &str) -> bool {
        let Some(target) = self.structured(base) else {
            return false;
        };
        self.base_chain(derived)
            .iter()
            .any(|t| t.full_name == target.full_name)
    }

    /// Resolve a type name written in a query.
    #[must_use]
    pub fn resolve_type(&self, name: &str) -> Option<TypeRef> {
        match self.overlays.get(name) {
            Some(t) => Some(t.type_ref()),
            None => self.model.resolve_type(name),
        }
    }

    /// Register the type `$compute` produces: `base` plus `properties`.
    pub(crate) fn add_compute_type(&mut self, base: &StructuredType, properties: Vec<Property>) -> Arc<str> {
        let name: Arc<str> = Arc::from(format!("{}{COMPUTE_SUFFIX}", base.full_name));
        let mut t = StructuredType::complex(&base.namespace, &format!("{}{COMPUTE_SUFFIX}", base.name));
        t.kind = base.kind;
        t.base_type = Some(base.full_name.clone());
        t.is_open = base.is_open;
        t.full_name = name.clone();
        self.computed.extend(properties.iter().map(|p| p.name.clone()));
        t.properties = properties;
        self.overlays.insert(name.clone(), Arc::new(t));
        name
    }

    /// Register a synthesized group/aggregate result type.
    pub(crate) fn add_result_type(&mut self, t: StructuredType) -> Arc<str> {
        let name = t.full_name.clone();
        self.overlays.insert(name.clone(), Arc::new(t));
        name
    }

    /// A fresh name for the next synthesized type derived from `base`.
    pub(crate) fn next_result_name(&self, base: &str) -> String {
        format!("{base}@apply{}", self.overlays.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odata_edm::{EdmModelBuilder, PrimitiveKind};

    fn model() -> Arc<EdmModel> {
        EdmModelBuilder::new("Default")
            .add_structured_type(
                StructuredType::entity("Ns", "Item")
                    .with_property(Property::structural(
                        "Id",
                        TypeRef::primitive(PrimitiveKind::Int32).required(),
                    ))
                    .with_property(Property::structural("Price", TypeRef::primitive(PrimitiveKind::Decimal)))
                    .with_key("Id"),
            )
            .add_entity_set("Items", "Ns.Item")
            .build()
            .unwrap()
    }

    #[test]
    fn compute_type_extends_element() {
        let mut schema = Schema::new(model());
        let base = schema.structured("Ns.Item").unwrap();
        let name = schema.add_compute_type(
            &base,
            vec![Property::structural("Total", TypeRef::primitive(PrimitiveKind::Decimal))],
        );
        assert!(schema.find_property(&name, "Price").is_some());
        assert!(schema.find_property(&name, "Total").is_some());
        assert_eq!(schema.keys(&name)[0].name.as_ref(), "Id");
        assert!(schema.is_assignable_to(&name, "Ns.Item"));
        let defaults: Vec<_> = schema
            .default_properties(&name)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(defaults.len(), 2);
    }
}
