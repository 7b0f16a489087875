//! Annotation map attached to schema elements at model-build time.
//!
//! Capabilities such as "not filterable" or "auto expand" are plain lookups
//! against this map; the binder, validator and applier never dispatch on
//! anything else to find out what a property allows.

use std::collections::BTreeMap;
use std::fmt;

/// Well-known annotation terms understood by the query core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnnotationTerm {
    NotFilterable,
    NotSortable,
    NotSelectable,
    NotExpandable,
    NotCountable,
    Contained,
    AutoExpand,
    AutoSelect,
    /// Server page size applied to an expanded collection.
    PageSize,
    /// Largest `$top` accepted for an expanded collection.
    MaxTop,
}

impl fmt::Display for AnnotationTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnnotationTerm::NotFilterable => "NotFilterable",
            AnnotationTerm::NotSortable => "NotSortable",
            AnnotationTerm::NotSelectable => "NotSelectable",
            AnnotationTerm::NotExpandable => "NotExpandable",
            AnnotationTerm::NotCountable => "NotCountable",
            AnnotationTerm::Contained => "Contained",
            AnnotationTerm::AutoExpand => "AutoExpand",
            AnnotationTerm::AutoSelect => "AutoSelect",
            AnnotationTerm::PageSize => "PageSize",
            AnnotationTerm::MaxTop => "MaxTop",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnnotationValue {
    Flag(bool),
    Count(usize),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct Annotations(BTreeMap<AnnotationTerm, AnnotationValue>);

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, term: AnnotationTerm, value: AnnotationValue) {
        self.0.insert(term, value);
    }

    pub fn with_flag(mut self, term: AnnotationTerm) -> Self {
        self.insert(term, AnnotationValue::Flag(true));
        self
    }

    pub fn with_count(mut self, term: AnnotationTerm, count: usize) -> Self {
        self.insert(term, AnnotationValue::Count(count));
        self
    }

    /// True when `term` is present as a set flag.
    #[must_use]
    pub fn flag(&self, term: AnnotationTerm) -> bool {
        matches!(self.0.get(&term), Some(AnnotationValue::Flag(true)))
    }

    #[must_use]
    pub fn count(&self, term: AnnotationTerm) -> Option<usize> {
        match self.0.get(&term) {
            Some(AnnotationValue::Count(n)) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AnnotationTerm, &AnnotationValue)> {
        self.0.iter()
    }
}
