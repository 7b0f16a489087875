//! EDM type system: primitive kinds, type references, structured and enum types.

use std::fmt;
use std::sync::Arc;

use crate::annotations::{AnnotationTerm, Annotations};

/// Primitive EDM kinds supported by the query core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveKind {
    Boolean,
    Byte,
    SByte,
    Int16,
    Int32,
    Int64,
    Single,
    Double,
    Decimal,
    String,
    Guid,
    DateTimeOffset,
    Date,
    TimeOfDay,
    Duration,
}

impl PrimitiveKind {
    const ALL: [PrimitiveKind; 15] = [
        PrimitiveKind::Boolean,
        PrimitiveKind::Byte,
        PrimitiveKind::SByte,
        PrimitiveKind::Int16,
        PrimitiveKind::Int32,
        PrimitiveKind::Int64,
        PrimitiveKind::Single,
        PrimitiveKind::Double,
        PrimitiveKind::Decimal,
        PrimitiveKind::String,
        PrimitiveKind::Guid,
        PrimitiveKind::DateTimeOffset,
        PrimitiveKind::Date,
        PrimitiveKind::TimeOfDay,
        PrimitiveKind::Duration,
    ];

    #[must_use]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            PrimitiveKind::Byte
                | PrimitiveKind::SByte
                | PrimitiveKind::Int16
                | PrimitiveKind::Int32
                | PrimitiveKind::Int64
        )
    }

    #[must_use]
    pub const fn is_numeric(self) -> bool {
        self.is_integral()
            || matches!(
                self,
                PrimitiveKind::Single | PrimitiveKind::Double | PrimitiveKind::Decimal
            )
    }

    /// Rank used for numeric promotion; `None` for non-numeric kinds.
    #[must_use]
    pub const fn promotion_rank(self) -> Option<u8> {
        match self {
            PrimitiveKind::Byte | PrimitiveKind::SByte => Some(1),
            PrimitiveKind::Int16 => Some(2),
            PrimitiveKind::Int32 => Some(3),
            PrimitiveKind::Int64 => Some(4),
            PrimitiveKind::Decimal => Some(5),
            PrimitiveKind::Single => Some(6),
            PrimitiveKind::Double => Some(7),
            _ => None,
        }
    }

    /// The common numeric kind two operands promote to.
    #[must_use]
    pub fn promote(self, other: PrimitiveKind) -> Option<PrimitiveKind> {
        let (a, b) = (self.promotion_rank()?, other.promotion_rank()?);
        Some(if a >= b { self } else { other })
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "Edm.Boolean",
            PrimitiveKind::Byte => "Edm.Byte",
            PrimitiveKind::SByte => "Edm.SByte",
            PrimitiveKind::Int16 => "Edm.Int16",
            PrimitiveKind::Int32 => "Edm.Int32",
            PrimitiveKind::Int64 => "Edm.Int64",
            PrimitiveKind::Single => "Edm.Single",
            PrimitiveKind::Double => "Edm.Double",
            PrimitiveKind::Decimal => "Edm.Decimal",
            PrimitiveKind::String => "Edm.String",
            PrimitiveKind::Guid => "Edm.Guid",
            PrimitiveKind::DateTimeOffset => "Edm.DateTimeOffset",
            PrimitiveKind::Date => "Edm.Date",
            PrimitiveKind::TimeOfDay => "Edm.TimeOfDay",
            PrimitiveKind::Duration => "Edm.Duration",
        }
    }

    /// Resolve `Edm.Int32` (the `Edm.` prefix is optional, case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let short = name
            .strip_prefix("Edm.")
            .or_else(|| name.strip_prefix("edm."))
            .unwrap_or(name);
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name()[4..].eq_ignore_ascii_case(short))
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Primitive(PrimitiveKind),
    Enum(Arc<str>),
    Complex(Arc<str>),
    Entity(Arc<str>),
    Collection(Box<TypeRef>),
}

/// Reference to a type, carrying nullability.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeRef {
    pub kind: TypeKind,
    pub nullable: bool,
}

impl TypeRef {
    /// Nullable primitive reference.
    #[must_use]
    pub const fn primitive(kind: PrimitiveKind) -> Self {
        Self {
            kind: TypeKind::Primitive(kind),
            nullable: true,
        }
    }

    #[must_use]
    pub fn enumeration(name: impl Into<Arc<str>>) -> Self {
        Self {
            kind: TypeKind::Enum(name.into()),
            nullable: true,
        }
    }

    #[must_use]
    pub fn complex(name: impl Into<Arc<str>>) -> Self {
        Self {
            kind: TypeKind::Complex(name.into()),
            nullable: true,
        }
    }

    #[must_use]
    pub fn entity(name: impl Into<Arc<str>>) -> Self {
        Self {
            kind: TypeKind::Entity(name.into()),
            nullable: true,
        }
    }

    #[must_use]
    pub fn collection(element: TypeRef) -> Self {
        Self {
            kind: TypeKind::Collection(Box::new(element)),
            nullable: false,
        }
    }

    #[must_use]
    pub const fn boolean() -> Self {
        Self::primitive(PrimitiveKind::Boolean)
    }

    #[must_use]
    pub const fn int32() -> Self {
        Self::primitive(PrimitiveKind::Int32)
    }

    #[must_use]
    pub const fn string() -> Self {
        Self::primitive(PrimitiveKind::String)
    }

    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Non-nullable copy of this reference.
    #[must_use]
    pub fn required(self) -> Self {
        self.with_nullable(false)
    }

    #[must_use]
    pub const fn is_collection(&self) -> bool {
        matches!(self.kind, TypeKind::Collection(_))
    }

    /// Element type for collections, `self` otherwise.
    #[must_use]
    pub fn element(&self) -> &TypeRef {
        match &self.kind {
            TypeKind::Collection(inner) => inner,
            _ => self,
        }
    }

    #[must_use]
    pub const fn as_primitive(&self) -> Option<PrimitiveKind> {
        match self.kind {
            TypeKind::Primitive(k) => Some(k),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_boolean(&self) -> bool {
        self.as_primitive() == Some(PrimitiveKind::Boolean)
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        self.as_primitive().is_some_and(PrimitiveKind::is_numeric)
    }

    /// Name of the structured (entity or complex) type this reference points at.
    #[must_use]
    pub fn structured_name(&self) -> Option<&Arc<str>> {
        match &self.kind {
            TypeKind::Entity(n) | TypeKind::Complex(n) => Some(n),
            _ => None,
        }
    }

    #[must_use]
    pub fn enum_name(&self) -> Option<&Arc<str>> {
        match &self.kind {
            TypeKind::Enum(n) => Some(n),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_entity(&self) -> bool {
        matches!(self.kind, TypeKind::Entity(_))
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Primitive(k) => write!(f, "{k}"),
            TypeKind::Enum(n) | TypeKind::Complex(n) | TypeKind::Entity(n) => f.write_str(n),
            TypeKind::Collection(inner) => write!(f, "Collection({inner})"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyKind {
    Structural,
    Navigation,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    pub name: Arc<str>,
    pub type_ref: TypeRef,
    pub kind: PropertyKind,
    pub annotations: Annotations,
}

impl Property {
    #[must_use]
    pub fn structural(name: impl Into<Arc<str>>, type_ref: TypeRef) -> Self {
        Self {
            name: name.into(),
            type_ref,
            kind: PropertyKind::Structural,
            annotations: Annotations::new(),
        }
    }

    #[must_use]
    pub fn navigation(name: impl Into<Arc<str>>, type_ref: TypeRef) -> Self {
        Self {
            name: name.into(),
            type_ref,
            kind: PropertyKind::Navigation,
            annotations: Annotations::new(),
        }
    }

    #[must_use]
    pub fn annotate(mut self, term: AnnotationTerm) -> Self {
        self.annotations = self.annotations.with_flag(term);
        self
    }

    #[must_use]
    pub fn annotate_count(mut self, term: AnnotationTerm, count: usize) -> Self {
        self.annotations = self.annotations.with_count(term, count);
        self
    }

    #[must_use]
    pub fn has(&self, term: AnnotationTerm) -> bool {
        self.annotations.flag(term)
    }

    #[must_use]
    pub const fn is_navigation(&self) -> bool {
        matches!(self.kind, PropertyKind::Navigation)
    }

    #[must_use]
    pub const fn is_collection(&self) -> bool {
        self.type_ref.is_collection()
    }
}

/// Key reference; `ordinal` overrides declaration order when set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyProperty {
    pub name: Arc<str>,
    pub ordinal: Option<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructuredKind {
    Entity,
    Complex,
}

impl fmt::Display for StructuredKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuredKind::Entity => f.write_str("entity"),
            StructuredKind::Complex => f.write_str("complex"),
        }
    }
}

/// Entity or complex type.
#[derive(Clone, Debug, PartialEq)]
pub struct StructuredType {
    pub namespace: Arc<str>,
    pub name: Arc<str>,
    pub full_name: Arc<str>,
    pub kind: StructuredKind,
    /// Qualified name of the base type.
    pub base_type: Option<Arc<str>>,
    pub is_abstract: bool,
    pub is_open: bool,
    pub properties: Vec<Property>,
    pub keys: Vec<KeyProperty>,
    pub annotations: Annotations,
}

impl StructuredType {
    fn new(namespace: &str, name: &str, kind: StructuredKind) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            full_name: qualify(namespace, name).into(),
            kind,
            base_type: None,
            is_abstract: false,
            is_open: false,
            properties: Vec::new(),
            keys: Vec::new(),
            annotations: Annotations::new(),
        }
    }

    #[must_use]
    pub fn entity(namespace: &str, name: &str) -> Self {
        Self::new(namespace, name, StructuredKind::Entity)
    }

    #[must_use]
    pub fn complex(namespace: &str, name: &str) -> Self {
        Self::new(namespace, name, StructuredKind::Complex)
    }

    #[must_use]
    pub fn with_base(mut self, base: impl Into<Arc<str>>) -> Self {
        self.base_type = Some(base.into());
        self
    }

    #[must_use]
    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    #[must_use]
    pub fn with_key(mut self, name: impl Into<Arc<str>>) -> Self {
        self.keys.push(KeyProperty {
            name: name.into(),
            ordinal: None,
        });
        self
    }

    #[must_use]
    pub fn with_key_ordinal(mut self, name: impl Into<Arc<str>>, ordinal: i32) -> Self {
        self.keys.push(KeyProperty {
            name: name.into(),
            ordinal: Some(ordinal),
        });
        self
    }

    #[must_use]
    pub fn open(mut self) -> Self {
        self.is_open = true;
        self
    }

    #[must_use]
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    #[must_use]
    pub fn declared_property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| &*p.name == name)
    }

    #[must_use]
    pub const fn is_entity(&self) -> bool {
        matches!(self.kind, StructuredKind::Entity)
    }

    /// Reference to this type.
    #[must_use]
    pub fn type_ref(&self) -> TypeRef {
        match self.kind {
            StructuredKind::Entity => TypeRef::entity(self.full_name.clone()),
            StructuredKind::Complex => TypeRef::complex(self.full_name.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumMember {
    pub name: Arc<str>,
    pub value: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumType {
    pub namespace: Arc<str>,
    pub name: Arc<str>,
    pub full_name: Arc<str>,
    pub members: Vec<EnumMember>,
    pub is_flags: bool,
}

impl EnumType {
    #[must_use]
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            full_name: qualify(namespace, name).into(),
            members: Vec::new(),
            is_flags: false,
        }
    }

    #[must_use]
    pub fn with_member(mut self, name: impl Into<Arc<str>>, value: i64) -> Self {
        self.members.push(EnumMember {
            name: name.into(),
            value,
        });
        self
    }

    #[must_use]
    pub fn flags(mut self) -> Self {
        self.is_flags = true;
        self
    }

    /// Member by exact name.
    #[must_use]
    pub fn member(&self, name: &str) -> Option<&EnumMember> {
        self.members.iter().find(|m| &*m.name == name)
    }

    #[must_use]
    pub fn member_by_value(&self, value: i64) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.value == value)
    }

    #[must_use]
    pub fn type_ref(&self) -> TypeRef {
        TypeRef::enumeration(self.full_name.clone())
    }
}

#[must_use]
pub fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_owned()
    } else {
        format!("{namespace}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_names_round_trip() {
        for k in PrimitiveKind::ALL {
            assert_eq!(PrimitiveKind::from_name(k.name()), Some(k));
        }
        assert_eq!(
            PrimitiveKind::from_name("int32"),
            Some(PrimitiveKind::Int32)
        );
        assert_eq!(PrimitiveKind::from_name("Edm.Nope"), None);
    }

    #[test]
    fn numeric_promotion_picks_wider_kind() {
        use PrimitiveKind as K;
        assert_eq!(K::Int32.promote(K::Int64), Some(K::Int64));
        assert_eq!(K::Int64.promote(K::Decimal), Some(K::Decimal));
        assert_eq!(K::Double.promote(K::Byte), Some(K::Double));
        assert_eq!(K::String.promote(K::Int32), None);
    }

    #[test]
    fn type_ref_display() {
        let t = TypeRef::collection(TypeRef::entity("Ns.Book"));
        assert_eq!(t.to_string(), "Collection(Ns.Book)");
        assert_eq!(t.element().structured_name().map(|n| &**n), Some("Ns.Book"));
        assert_eq!(TypeRef::int32().to_string(), "Edm.Int32");
    }
}
