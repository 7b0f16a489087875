//! Row sources a query is applied to.

use std::sync::Arc;

use odata_edm::Record;

use crate::error::ExecutionError;

pub type Rows<'a> = Box<dyn Iterator<Item = Result<Arc<Record>, ExecutionError>> + 'a>;

/// A re-enumerable collection of records.
pub trait DataSource {
    /// Start a fresh enumeration.
    fn scan(&self) -> Rows<'_>;

    /// Whether member access on `null` should yield `null` when the query
    /// leaves null propagation at its default.
    fn null_propagation(&self) -> bool {
        true
    }
}

impl DataSource for [Record] {
    fn scan(&self) -> Rows<'_> {
        Box::new(self.iter().map(|r| Ok::<_, ExecutionError>(Arc::new(r.clone()))))
    }
}

impl DataSource for [Arc<Record>] {
    fn scan(&self) -> Rows<'_> {
        Box::new(self.iter().cloned().map(Ok::<_, ExecutionError>))
    }
}

impl DataSource for Vec<Record> {
    fn scan(&self) -> Rows<'_> {
        self.as_slice().scan()
    }
}

impl DataSource for Vec<Arc<Record>> {
    fn scan(&self) -> Rows<'_> {
        self.as_slice().scan()
    }
}

/// Records produced on demand by a closure, with an explicit null-propagation
/// preference. Useful for sources that cannot propagate nulls natively.
pub struct FnSource<F> {
    scan: F,
    propagate_nulls: bool,
}

impl<F, I> FnSource<F>
where
    F: Fn() -> I,
    I: Iterator<Item = Result<Arc<Record>, ExecutionError>>,
{
    pub const fn new(scan: F, propagate_nulls: bool) -> Self {
        Self {
            scan,
            propagate_nulls,
        }
    }
}

impl<F, I> DataSource for FnSource<F>
where
    F: Fn() -> I,
    I: Iterator<Item = Result<Arc<Record>, ExecutionError>> + 'static,
{
    fn scan(&self) -> Rows<'_> {
        Box::new((self.scan)())
    }

    fn null_propagation(&self) -> bool {
        self.propagate_nulls
    }
}
