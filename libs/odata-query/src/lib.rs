#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! OData query-option core: parse `$filter`, `$select`, `$expand`,
//! `$orderby`, `$top`, `$skip`, `$count`, `$apply`, `$search`, `$compute`
//! and `$skiptoken`, bind them against an [`odata_edm::EdmModel`], validate
//! them against configured limits and apply them to in-memory or streamed
//! records.
//!
//! ```text
//! raw query -> syntax::parse_query -> bind::bind_query -> validate::validate
//!           -> apply::Pipeline (compiled plan) -> QueryResult
//! ```
//!
//! [`QueryEngine`] wires the stages together for a shared model and
//! configuration.

pub mod apply;
pub mod bind;
pub mod compile;
pub mod container;
pub mod engine;
pub mod error;
pub mod problem;
pub mod settings;
pub mod skiptoken;
pub mod syntax;
pub mod truncated;
pub mod validate;

pub use apply::{
    ComposedQuery, ContainsMatcher, DataSource, FnSource, Pipeline, QueryResult, SearchMatcher,
    apply_to, apply_to_stream, compose,
};
pub use bind::functions::FunctionRegistry;
pub use bind::{BindTarget, BoundQuery, bind_query};
pub use compile::PlanCache;
pub use container::{
    CamelCaseNameMapper, DeferredExpansion, IdentityNameMapper, NamedProperty, ProjectedValue,
    PropertyContainer, PropertyNameMapper,
};
pub use engine::{ODataQueryOptions, QueryEngine};
pub use error::{BindError, ConfigError, Error, ErrorKind, ExecutionError, ParseError, ValidationError};
pub use problem::Problem;
pub use settings::{
    Allowed, ArithmeticOperator, HandleNullPropagation, LogicalOperator, ODataConfig,
    ParserSettings, QueryOption, QuerySettings, ValidationSettings,
};
pub use skiptoken::SkipToken;
pub use syntax::{ParsedQuery, parse_query};
pub use truncated::TruncatedCollection;
pub use validate::validate;
