#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Entity Data Model for the OData query core: types, annotations,
//! operations, the immutable [`EdmModel`] and the runtime [`Value`]s that
//! queries evaluate over.

pub mod annotations;
pub mod builder;
pub mod error;
mod json;
pub mod model;
pub mod operations;
pub mod provider;
pub mod types;
pub mod value;

pub use annotations::{AnnotationTerm, AnnotationValue, Annotations};
pub use builder::EdmModelBuilder;
pub use error::ModelError;
pub use model::{EdmModel, EntityContainer, EntitySet, Singleton};
pub use operations::{Operation, OperationKind, Parameter};
pub use provider::EdmEntity;
pub use types::{
    EnumMember, EnumType, KeyProperty, PrimitiveKind, Property, PropertyKind, StructuredKind,
    StructuredType, TypeKind, TypeRef, qualify,
};
pub use value::{EnumValue, Record, Value, format_duration, parse_duration};
