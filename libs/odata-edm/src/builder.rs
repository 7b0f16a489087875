//! Model construction and build-time validation.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::annotations::Annotations;
use crate::error::ModelError;
use crate::model::{EdmModel, EntityContainer, EntitySet, Singleton};
use crate::operations::Operation;
use crate::provider::EdmEntity;
use crate::types::{EnumType, PropertyKind, StructuredKind, StructuredType, TypeKind, TypeRef};

/// Collects schema elements and validates them into an [`EdmModel`].
///
/// ```
/// use odata_edm::{EdmModelBuilder, Property, StructuredType, TypeRef};
///
/// let model = EdmModelBuilder::new("Sales")
///     .add_structured_type(
///         StructuredType::entity("Sales", "Customer")
///             .with_property(Property::structural("Id", TypeRef::int32().required()))
///             .with_key("Id"),
///     )
///     .add_entity_set("Customers", "Sales.Customer")
///     .build()
///     .unwrap();
/// assert!(model.entity_set("Customers").is_some());
/// ```
#[must_use]
pub struct EdmModelBuilder {
    container_name: Arc<str>,
    structured: Vec<StructuredType>,
    enums: Vec<EnumType>,
    operations: Vec<Operation>,
    entity_sets: Vec<EntitySet>,
    singletons: Vec<Singleton>,
    rust_types: Vec<(TypeId, Arc<str>)>,
}

impl EdmModelBuilder {
    pub fn new(container_name: impl Into<Arc<str>>) -> Self {
        Self {
            container_name: container_name.into(),
            structured: Vec::new(),
            enums: Vec::new(),
            operations: Vec::new(),
            entity_sets: Vec::new(),
            singletons: Vec::new(),
            rust_types: Vec::new(),
        }
    }

    pub fn add_structured_type(mut self, t: StructuredType) -> Self {
        self.structured.push(t);
        self
    }

    pub fn add_enum_type(mut self, t: EnumType) -> Self {
        self.enums.push(t);
        self
    }

    pub fn add_operation(mut self, op: Operation) -> Self {
        self.operations.push(op);
        self
    }

    pub fn add_entity_set(self, name: &str, entity_type: &str) -> Self {
        self.add_entity_set_with(name, entity_type, Annotations::new())
    }

    pub fn add_entity_set_with(
        mut self,
        name: &str,
        entity_type: &str,
        annotations: Annotations,
    ) -> Self {
        self.entity_sets.push(EntitySet {
            name: name.into(),
            entity_type: entity_type.into(),
            annotations,
        });
        self
    }

    pub fn add_singleton(mut self, name: &str, entity_type: &str) -> Self {
        self.singletons.push(Singleton {
            name: name.into(),
            entity_type: entity_type.into(),
        });
        self
    }

    /// Add the shape of `T` and remember the Rust type mapping.
    pub fn register<T: EdmEntity>(mut self) -> Self {
        let t = T::edm_type();
        self.rust_types
            .push((TypeId::of::<T>(), t.full_name.clone()));
        self.structured.push(t);
        self
    }

    /// Validate everything collected so far and freeze it.
    ///
    /// # Errors
    /// Returns the first [`ModelError`] found: duplicate names, unknown or
    /// mismatched base types, inheritance cycles, missing or invalid keys,
    /// unresolved property/operation types, navigation targets that are not
    /// entity types, or entity sets pointing at unknown types.
    pub fn build(self) -> Result<Arc<EdmModel>, ModelError> {
        let mut structured = HashMap::new();
        let mut enums = HashMap::new();
        let mut seen = HashSet::new();

        for t in self.structured {
            if !seen.insert(t.full_name.clone()) {
                return Err(ModelError::DuplicateType(t.full_name.to_string()));
            }
            structured.insert(t.full_name.clone(), Arc::new(t));
        }
        for e in self.enums {
            if !seen.insert(e.full_name.clone()) {
                return Err(ModelError::DuplicateType(e.full_name.to_string()));
            }
            enums.insert(e.full_name.clone(), Arc::new(e));
        }

        let check = Checker {
            structured: &structured,
            enums: &enums,
        };
        for t in structured.values() {
            check.base(t)?;
        }
        for t in structured.values() {
            check.acyclic(t)?;
        }
        for t in structured.values() {
            check.properties(t)?;
            check.keys(t)?;
        }

        let mut operations: HashMap<Arc<str>, Vec<Arc<Operation>>> = HashMap::new();
        for op in self.operations {
            for t in op
                .parameters
                .iter()
                .map(|p| &p.type_ref)
                .chain(op.return_type.as_ref())
            {
                if !check.resolves(t) {
                    return Err(ModelError::UnknownOperationType {
                        operation: op.full_name.to_string(),
                        target: t.to_string(),
                    });
                }
            }
            operations
                .entry(op.full_name.clone())
                .or_default()
                .push(Arc::new(op));
        }

        let mut container = EntityContainer {
            name: self.container_name,
            ..EntityContainer::default()
        };
        for set in self.entity_sets {
            if !check.is_entity(&set.entity_type) {
                return Err(ModelError::UnknownEntitySetType {
                    set: set.name.to_string(),
                    target: set.entity_type.to_string(),
                });
            }
            if container.entity_sets.contains_key(&set.name) {
                return Err(ModelError::DuplicateType(set.name.to_string()));
            }
            container.entity_sets.insert(set.name.clone(), set);
        }
        for single in self.singletons {
            if !check.is_entity(&single.entity_type) {
                return Err(ModelError::UnknownSingletonType {
                    set: single.name.to_string(),
                    target: single.entity_type.to_string(),
                });
            }
            container.singletons.insert(single.name.clone(), single);
        }

        debug!(
            container = %container.name,
            structured_types = structured.len(),
            enum_types = enums.len(),
            operations = operations.len(),
            entity_sets = container.entity_sets.len(),
            "EDM model built"
        );

        Ok(Arc::new(EdmModel::new(
            structured,
            enums,
            operations,
            container,
            self.rust_types.into_iter().collect(),
        )))
    }
}

struct Checker<'a> {
    structured: &'a HashMap<Arc<str>, Arc<StructuredType>>,
    enums: &'a HashMap<Arc<str>, Arc<EnumType>>,
}

impl Checker<'_> {
    fn is_entity(&self, name: &str) -> bool {
        self.structured.get(name).is_some_and(|t| t.is_entity())
    }

    fn resolves(&self, t: &TypeRef) -> bool {
        match &t.kind {
            TypeKind::Primitive(_) => true,
            TypeKind::Enum(n) => self.enums.contains_key(n),
            TypeKind::Complex(n) => self
                .structured
                .get(n)
                .is_some_and(|s| s.kind == StructuredKind::Complex),
            TypeKind::Entity(n) => self.is_entity(n),
            TypeKind::Collection(inner) => !inner.is_collection() && self.resolves(inner),
        }
    }

    fn base(&self, t: &StructuredType) -> Result<(), ModelError> {
        let Some(base_name) = &t.base_type else {
            return Ok(());
        };
        let base = self
            .structured
            .get(base_name)
            .ok_or_else(|| ModelError::UnknownBaseType {
                type_name: t.full_name.to_string(),
                base: base_name.to_string(),
            })?;
        if base.kind != t.kind {
            return Err(ModelError::InvalidBaseType {
                type_name: t.full_name.to_string(),
                base: base_name.to_string(),
                reason: "base and derived type must both be entity or both be complex",
            });
        }
        if base.is_open && !t.is_open {
            return Err(ModelError::InvalidBaseType {
                type_name: t.full_name.to_string(),
                base: base_name.to_string(),
                reason: "a type deriving from an open type must be open",
            });
        }
        Ok(())
    }

    fn acyclic(&self, t: &StructuredType) -> Result<(), ModelError> {
        let mut visited = HashSet::new();
        let mut current = Some(t);
        while let Some(c) = current {
            if !visited.insert(c.full_name.clone()) {
                return Err(ModelError::InheritanceCycle(t.full_name.to_string()));
            }
            current = c
                .base_type
                .as_ref()
                .and_then(|b| self.structured.get(b))
                .map(Arc::as_ref);
        }
        Ok(())
    }

    fn chain(&self, t: &StructuredType) -> Vec<&StructuredType> {
        let mut out = Vec::new();
        let mut current = t.base_type.as_ref().and_then(|b| self.structured.get(b));
        while let Some(c) = current {
            out.push(c.as_ref());
            current = c.base_type.as_ref().and_then(|b| self.structured.get(b));
        }
        out
    }

    fn properties(&self, t: &StructuredType) -> Result<(), ModelError> {
        let inherited: HashSet<&str> = self
            .chain(t)
            .iter()
            .flat_map(|b| b.properties.iter().map(|p| &*p.name))
            .collect();
        let mut own = HashSet::new();
        for p in &t.properties {
            if !own.insert(&*p.name) || inherited.contains(&*p.name) {
                return Err(ModelError::DuplicateProperty {
                    type_name: t.full_name.to_string(),
                    property: p.name.to_string(),
                });
            }
            if !self.resolves(&p.type_ref) {
                return Err(ModelError::UnknownType {
                    type_name: t.full_name.to_string(),
                    property: p.name.to_string(),
                    target: p.type_ref.to_string(),
                });
            }
            let targets_entity = p.type_ref.element().is_entity();
            match p.kind {
                PropertyKind::Navigation if !targets_entity => {
                    return Err(ModelError::InvalidNavigation {
                        type_name: t.full_name.to_string(),
                        property: p.name.to_string(),
                        reason: "navigation target is not an entity type",
                    });
                }
                PropertyKind::Structural if targets_entity => {
                    return Err(ModelError::InvalidNavigation {
                        type_name: t.full_name.to_string(),
                        property: p.name.to_string(),
                        reason: "entity-typed property must be declared as navigation",
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn keys(&self, t: &StructuredType) -> Result<(), ModelError> {
        if !t.is_entity() {
            return Ok(());
        }
        let chain = self.chain(t);
        let inherited_keys = chain.iter().any(|b| !b.keys.is_empty());
        if t.keys.is_empty() {
            if inherited_keys || t.is_abstract {
                return Ok(());
            }
            return Err(ModelError::MissingKey(t.full_name.to_string()));
        }
        if inherited_keys {
            return Err(ModelError::InvalidKey {
                type_name: t.full_name.to_string(),
                key: t.keys[0].name.to_string(),
            });
        }
        for key in &t.keys {
            let prop = t
                .declared_property(&key.name)
                .or_else(|| chain.iter().find_map(|b| b.declared_property(&key.name)));
            let valid = prop.is_some_and(|p| {
                p.kind == PropertyKind::Structural
                    && matches!(p.type_ref.kind, TypeKind::Primitive(_) | TypeKind::Enum(_))
            });
            if !valid {
                return Err(ModelError::InvalidKey {
                    type_name: t.full_name.to_string(),
                    key: key.name.to_string(),
                });
            }
        }
        Ok(())
    }
}
