use thiserror::Error;

/// Failures raised while building a model or coercing data into it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("duplicate schema element: {0}")]
    DuplicateType(String),

    #[error("type {type_name} refers to unknown base type {base}")]
    UnknownBaseType { type_name: String, base: String },

    #[error("type {type_name} cannot derive from {base}: {reason}")]
    InvalidBaseType {
        type_name: String,
        base: String,
        reason: &'static str,
    },

    #[error("inheritance cycle through {0}")]
    InheritanceCycle(String),

    #[error("entity type {0} declares no key")]
    MissingKey(String),

    #[error("key {key} of {type_name} is not a primitive or enum property")]
    InvalidKey { type_name: String, key: String },

    #[error("property {property} of {type_name} refers to unknown type {target}")]
    UnknownType {
        type_name: String,
        property: String,
        target: String,
    },

    #[error("property {property} is declared more than once on {type_name}")]
    DuplicateProperty { type_name: String, property: String },

    #[error("property {property} of {type_name}: {reason}")]
    InvalidNavigation {
        type_name: String,
        property: String,
        reason: &'static str,
    },

    #[error("entity set {set} refers to unknown entity type {target}")]
    UnknownEntitySetType { set: String, target: String },

    #[error("singleton {set} refers to unknown entity type {target}")]
    UnknownSingletonType { set: String, target: String },

    #[error("operation {operation} refers to unknown type {target}")]
    UnknownOperationType { operation: String, target: String },

    #[error("{type_name} has no property {property}")]
    UnknownProperty { type_name: String, property: String },

    #[error("unknown structured type {0}")]
    UnknownStructuredType(String),

    #[error("cannot convert {found} to {expected} for {path}")]
    Coercion {
        path: String,
        expected: String,
        found: String,
    },
}
