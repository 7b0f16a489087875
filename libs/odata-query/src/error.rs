//! Error types for every pipeline stage.
//!
//! Each stage owns its own enum; [`Error`] unifies them for callers that run
//! the whole pipeline. Mapping to transport status codes is pure data
//! ([`Error::status`]); building responses is left to the host framework.

use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Malformed query syntax.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {option} at position {position} near `{token}`: {message}")]
pub struct ParseError {
    /// Query option the error was found in, e.g. `$filter`.
    pub option: String,
    pub message: String,
    /// Character offset inside the option value.
    pub position: usize,
    /// Offending substring.
    pub token: String,
}

impl ParseError {
    pub fn new(
        option: impl Into<String>,
        message: impl Into<String>,
        position: usize,
        token: impl Into<String>,
    ) -> Self {
        Self {
            option: option.into(),
            message: message.into(),
            position,
            token: token.into(),
        }
    }
}

fn did_you_mean(suggestion: Option<&str>) -> String {
    suggestion.map_or_else(String::new, |s| format!(" (did you mean `{s}`?)"))
}

/// The query is well formed but does not fit the model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("property `{property}` not found on type `{type_name}`{}", did_you_mean(.suggestion.as_deref()))]
    PropertyNotFound {
        property: String,
        type_name: String,
        suggestion: Option<String>,
    },

    #[error("type `{0}` not found")]
    TypeNotFound(String),

    #[error("entity set `{0}` not found")]
    EntitySetNotFound(String),

    #[error("no function matches `{signature}`")]
    FunctionNotFound { signature: String },

    #[error("call `{signature}` matches more than one overload")]
    AmbiguousFunction { signature: String },

    #[error("incompatible operand types for `{operator}`: {left} and {right}")]
    TypeMismatch {
        operator: String,
        left: String,
        right: String,
    },

    #[error("{context} expects {expected}, found {found}")]
    ExpectedType {
        context: String,
        expected: String,
        found: String,
    },

    #[error("`{member}` is not a member of enum `{enum_type}`")]
    UnknownEnumMember { enum_type: String, member: String },

    #[error("range variable `{0}` is not in scope")]
    RangeVariableNotFound(String),

    #[error("range variable `{0}` is already defined in an enclosing scope")]
    RangeVariableShadowed(String),

    #[error("cannot cast `{from}` to `{to}`: types are not related")]
    InvalidCast { from: String, to: String },

    #[error("`{0}` is not a navigation property")]
    NotNavigation(String),

    #[error("alias `{0}` is defined more than once")]
    DuplicateAlias(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// A limit or model capability rejected the query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("$top value {value} exceeds the maximum of {max}")]
    TopExceeded { value: usize, max: usize },

    #[error("$skip value {value} exceeds the maximum of {max}")]
    SkipExceeded { value: usize, max: usize },

    #[error("$expand depth {depth} exceeds the maximum of {max}")]
    ExpansionDepthExceeded { depth: usize, max: usize },

    #[error("any/all nesting depth {depth} exceeds the maximum of {max}")]
    AnyAllDepthExceeded { depth: usize, max: usize },

    #[error("expression has {count} nodes, the maximum is {max}")]
    NodeCountExceeded { count: usize, max: usize },

    #[error("$orderby has {count} clauses, the maximum is {max}")]
    OrderByTooManyClauses { count: usize, max: usize },

    #[error("query is {length} characters long, the maximum is {max}")]
    QueryTooLong { length: usize, max: usize },

    #[error("query option {0} is not allowed")]
    OptionNotAllowed(String),

    #[error("operator `{0}` is not allowed")]
    OperatorNotAllowed(String),

    #[error("function `{0}` is not allowed")]
    FunctionNotAllowed(String),

    #[error("property `{0}` cannot be used in $filter")]
    NotFilterable(String),

    #[error("property `{0}` cannot be used in $orderby")]
    NotSortable(String),

    #[error("property `{0}` cannot be used in $select")]
    NotSelectable(String),

    #[error("navigation property `{0}` cannot be expanded")]
    NotExpandable(String),

    #[error("`{0}` cannot be counted")]
    NotCountable(String),

    #[error("$skiptoken does not match the query: {0}")]
    SkipTokenMismatch(&'static str),
}

/// Failure while evaluating a validated query against data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("null reference while evaluating `{path}`")]
    NullReference { path: String },

    #[error("type error: {0}")]
    TypeError(String),

    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    #[error("data source error: {0}")]
    Source(String),

    #[error("query cancelled")]
    Cancelled,

    #[error("query timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
}

/// Stage an [`Error`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Bind,
    Validation,
    Execution,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Error::Parse(_) => ErrorKind::Parse,
            Error::Bind(_) => ErrorKind::Bind,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Execution(_) => ErrorKind::Execution,
        }
    }

    /// Client errors map to 400, evaluation failures to 500.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Error::Parse(_) | Error::Bind(_) | Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Execution(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Invalid configuration values or an unreadable configuration source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to load OData configuration: {0}")]
    Load(String),

    #[error("invalid OData configuration `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_stage() {
        let parse: Error = ParseError::new("$filter", "unexpected end", 4, "").into();
        assert_eq!(parse.kind(), ErrorKind::Parse);
        assert_eq!(parse.status(), StatusCode::BAD_REQUEST);

        let exec: Error = ExecutionError::Cancelled.into();
        assert_eq!(exec.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn property_not_found_mentions_suggestion() {
        let e = BindError::PropertyNotFound {
            property: "Nmae".to_owned(),
            type_name: "Ns.Customer".to_owned(),
            suggestion: Some("Name".to_owned()),
        };
        let text = e.to_string();
        assert!(text.contains("`Nmae`"));
        assert!(text.contains("did you mean `Name`"));
    }
}
