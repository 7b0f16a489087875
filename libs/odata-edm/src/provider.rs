use crate::types::StructuredType;
use crate::value::Record;

/// Contract between a Rust type and the schema model.
///
/// Implementors describe their EDM shape once and convert instances into
/// runtime [`Record`]s; the query core never inspects Rust types directly.
pub trait EdmEntity: 'static {
    /// Qualified EDM name, e.g. `Sales.Customer`.
    const EDM_TYPE: &'static str;

    fn edm_type() -> StructuredType;

    fn to_record(&self) -> Record;
}
