//! Select/expand projection into [`PropertyContainer`]s.

use std::sync::Arc;

use odata_edm::{Record, Value};

use super::order::sort_rows;
use crate::compile::plan::CompiledSelection;
use crate::compile::{CompiledExpansion, CompiledProjection, Scope};
use crate::container::{DeferredExpansion, ProjectedValue, PropertyContainer};
use crate::error::ExecutionError;
use crate::truncated::TruncatedCollection;

/// Projects records; cheap to clone into deferred expansions.
#[derive(Clone, Debug)]
pub(crate) struct Projector {
    params: Arc<[Value]>,
    defer: bool,
}

impl Projector {
    pub(crate) fn new(params: Arc<[Value]>, defer: bool) -> Self {
        Self { params, defer }
    }

    pub(crate) fn project(
        &self,
        record: &Arc<Record>,
        p: &CompiledProjection,
    ) -> Result<PropertyContainer, ExecutionError> {
        let actual = record.type_name_arc().clone();
        let mut out = PropertyContainer::new(actual.clone());
        if p.all {
            self.project_all(record, p, &mut out);
        }
        for sel in &p.properties {
            if !applies(p, &actual, sel.type_cast.as_deref())
                || (p.all && out.get(&sel.name).is_some())
            {
                continue;
            }
            let value = record.get(&sel.name).cloned().unwrap_or(Value::Null);
            out.push(sel.name.clone(), self.selected(value, sel)?, sel.auto);
        }
        for e in &p.expansions {
            if !applies(p, &actual, e.type_cast.as_deref()) {
                continue;
            }
            let source = record.get(&e.name).cloned().unwrap_or(Value::Null);
            let value = if self.defer {
                ProjectedValue::Deferred(Arc::new(DeferredExpansion::new(
                    source,
                    e.clone(),
                    self.clone(),
                )))
            } else {
                self.expand(&source, e)?
            };
            out.push(e.name.clone(), value, e.auto);
        }
        Ok(out)
    }

    /// Declared structural properties of the runtime type, then dynamic
    /// ones when the type is open.
    fn project_all(&self, record: &Record, p: &CompiledProjection, out: &mut PropertyContainer) {
        let declared = p.schema.default_properties(record.type_name());
        for prop in &declared {
            let value = record.get(&prop.name).cloned().unwrap_or(Value::Null);
            out.push(prop.name.clone(), ProjectedValue::Value(value), false);
        }
        if !p.schema.is_open(record.type_name()) {
            return;
        }
        for (name, value) in record.properties() {
            if p.schema.find_property(record.type_name(), name).is_none() {
                out.push(Arc::from(name), ProjectedValue::Value(value.clone()), false);
            }
        }
    }

    fn selected(&self, value: Value, sel: &CompiledSelection) -> Result<ProjectedValue, ExecutionError> {
        let Some(nested) = sel.nested.as_deref() else {
            return Ok(ProjectedValue::Value(value));
        };
        match value {
            Value::Record(r) => Ok(ProjectedValue::Nested(Box::new(self.project(&r, nested)?))),
            Value::Collection(items) => {
                let projected = items
                    .iter()
                    .filter_map(Value::as_record)
                    .map(|r| self.project(r, nested))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ProjectedValue::Collection(TruncatedCollection::unbounded(projected)))
            }
            other => Ok(ProjectedValue::Value(other)),
        }
    }

    /// Evaluate one expansion of `source`, the raw navigation value.
    pub(crate) fn expand(
        &self,
        source: &Value,
        e: &CompiledExpansion,
    ) -> Result<ProjectedValue, ExecutionError> {
        if !e.collection {
            let Value::Record(target) = source else {
                return Ok(ProjectedValue::NullNavigation);
            };
            if let Some(filter) = &e.filter {
                let it = Value::Record(target.clone());
                if !filter.matches(&Scope::root(&it, &self.params))? {
                    return Ok(ProjectedValue::NullNavigation);
                }
            }
            return Ok(ProjectedValue::Nested(Box::new(self.project(target, &e.projection)?)));
        }

        let mut rows: Vec<Arc<Record>> = source
            .as_collection()
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_record)
            .cloned()
            .collect();
        if let Some(filter) = &e.filter {
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                let it = Value::Record(row.clone());
                if filter.matches(&Scope::root(&it, &self.params))? {
                    kept.push(row);
                }
            }
            rows = kept;
        }
        let total = rows.len();
        let sorted = sort_rows(rows, &e.order, &self.params)?;
        let window = sorted
            .into_iter()
            .map(|(_, row)| row)
            .skip(e.skip.unwrap_or(0))
            .take(e.top.unwrap_or(usize::MAX));
        let page = match e.page_size {
            Some(p) => TruncatedCollection::new(window, p),
            None => TruncatedCollection::unbounded(window),
        };
        let mut page = page.try_map(|row| self.project(&row, &e.projection))?;
        if e.count {
            page = page.with_total_count(u64::try_from(total).unwrap_or(u64::MAX));
        }
        Ok(ProjectedValue::Collection(page))
    }
}

/// Whether a member restricted to `type_cast` applies to an instance of `actual`.
fn applies(p: &CompiledProjection, actual: &str, type_cast: Option<&str>) -> bool {
    type_cast.is_none_or(|t| p.schema.is_assignable_to(actual, t))
}
