//! Query application: runs a bound query over a [`DataSource`].
//!
//! Stages run in a fixed order: `$apply`, `$compute`, `$filter`, `$search`,
//! `$count`, ordering, `$skiptoken`, `$skip`, `$top` and the server page
//! size, then select/expand projection.

pub(crate) mod aggregate;
pub(crate) mod order;
pub(crate) mod project;
pub mod result;
pub mod search;
pub mod source;
pub mod stream;

use std::sync::Arc;

use odata_edm::{Record, Value};
use tracing::{debug, warn};

use crate::bind::bound::BoundOrderBy;
use crate::bind::{BoundQuery, order_signature};
use crate::compile::plan::{PlanInput, effective_order};
use crate::compile::{CompiledPlan, Compiler, PlanCache, Scope};
use crate::error::{Error, ExecutionError};
use crate::settings::QuerySettings;
use crate::skiptoken::SkipToken;
use crate::syntax::ast::{SearchExpr, SortDir};
use crate::truncated::TruncatedCollection;
use aggregate::apply_transformations;
use order::{Keyed, sort_rows};
use project::Projector;

pub use result::QueryResult;
pub use search::{ContainsMatcher, SearchMatcher};
pub use source::{DataSource, FnSource, Rows};
pub use stream::apply_to_stream;

/// A query compiled for execution; reusable across runs and sources.
pub struct Pipeline {
    plan: Arc<CompiledPlan>,
    params: Arc<[Value]>,
    element_type: Arc<str>,
    search: Option<SearchExpr>,
    matcher: Arc<dyn SearchMatcher>,
    count: bool,
    skip: Option<usize>,
    top: Option<usize>,
    page_size: Option<usize>,
    cursor: Option<SkipToken>,
    order_signature: String,
    directions: Vec<SortDir>,
    /// The ordering includes every stable key, so its values identify a row.
    keyset: bool,
    filter_hash: Option<String>,
    defer: bool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("element_type", &self.element_type)
            .field("order", &self.order_signature)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Compile `query` without a plan cache, using [`ContainsMatcher`] for `$search`.
    ///
    /// # Errors
    /// Returns an error for an undecodable or mismatched `$skiptoken`.
    pub fn new(
        query: &BoundQuery,
        settings: &QuerySettings,
        source_prefers_nulls: bool,
    ) -> Result<Self, Error> {
        Self::prepare(query, settings, source_prefers_nulls, None, Arc::new(ContainsMatcher))
    }

    /// Compile `query`, sharing compiled plans through `cache` when constant
    /// parameterization is enabled.
    ///
    /// # Errors
    /// Returns an error for an undecodable or mismatched `$skiptoken`.
    pub fn prepare(
        query: &BoundQuery,
        settings: &QuerySettings,
        source_prefers_nulls: bool,
        cache: Option<&PlanCache>,
        matcher: Arc<dyn SearchMatcher>,
    ) -> Result<Self, Error> {
        let propagate = settings.handle_null_propagation.resolve(source_prefers_nulls);
        let paged = query.top.is_some()
            || query.skip.is_some()
            || query.skiptoken.is_some()
            || settings.page_size.is_some();
        let order = effective_order(
            &query.orderby,
            &query.stable_keys,
            settings.ensure_stable_ordering,
            paged,
        );
        let signature = order_signature(&order);
        let directions: Vec<SortDir> = order.iter().map(|o| o.direction).collect();
        let keyset = covers_keys(&order, &query.stable_keys);

        let cursor = query
            .skiptoken
            .as_deref()
            .map(SkipToken::decode)
            .transpose()?;
        if let Some(c) = &cursor {
            let key_count = if keyset { directions.len() } else { 0 };
            c.validate_against(&signature, key_count, query.filter_hash.as_deref())?;
        }
        let top = match (query.top, cursor.as_ref().and_then(|c| c.remaining_top)) {
            (Some(top), Some(remaining)) => Some(top.min(remaining)),
            (top, remaining) => top.or(remaining),
        };

        let parameterize = settings.enable_constant_parameterization;
        let ensure_stable = settings.ensure_stable_ordering;
        let (input, params) = PlanInput::from_query(query, order, parameterize);
        let shape = input.shape(query, propagate, ensure_stable);
        let compiler = Compiler::new(query.schema.clone(), propagate);
        let plan = match cache {
            Some(cache) if parameterize => {
                cache.get_or_compile(&shape, || input.compile(&compiler, shape.clone(), ensure_stable))
            }
            _ => Arc::new(input.compile(&compiler, shape, ensure_stable)),
        };
        debug!(
            element_type = %query.element_type,
            parameters = params.len(),
            order = %signature,
            "prepared query plan"
        );

        Ok(Self {
            plan,
            params: params.into(),
            element_type: query.element_type.clone(),
            search: query.search.clone(),
            matcher,
            count: query.count,
            skip: query.skip,
            top,
            page_size: settings.page_size,
            cursor,
            order_signature: signature,
            directions,
            keyset,
            filter_hash: query.filter_hash.clone(),
            defer: settings.defer_expansion,
        })
    }

    #[must_use]
    pub fn plan(&self) -> &Arc<CompiledPlan> {
        &self.plan
    }

    /// Values lifted out of the query by constant parameterization.
    #[must_use]
    pub fn parameters(&self) -> &[Value] {
        &self.params
    }

    /// Signed signature of the effective ordering, stable keys included.
    #[must_use]
    pub fn order_signature(&self) -> &str {
        &self.order_signature
    }

    /// Run every stage over `rows`.
    ///
    /// # Errors
    /// Returns [`Error::Execution`] when evaluation or the source fails.
    pub fn run(&self, rows: Rows<'_>) -> Result<QueryResult, Error> {
        let rows = self.members(rows)?;
        let total = rows.len();
        let sorted = sort_rows(rows, &self.plan.order, &self.params)?;
        let (start, resumed) = self.resume(sorted);
        let limited = resumed.into_iter().take(self.top.unwrap_or(usize::MAX));
        let page = match self.page_size {
            Some(p) => TruncatedCollection::new(limited, p),
            None => TruncatedCollection::unbounded(limited),
        };

        let next_page_cursor = if page.is_truncated() {
            warn!(
                element_type = %self.element_type,
                page_size = ?self.page_size,
                total,
                "result truncated by server page size"
            );
            self.next_cursor(start, &page)?
        } else {
            None
        };

        let projector = Projector::new(self.params.clone(), self.defer);
        let mut value = page.try_map(|(_, row)| projector.project(&row, &self.plan.projection))?;
        let total_count = self.count.then(|| u64::try_from(total).unwrap_or(u64::MAX));
        if let Some(count) = total_count {
            value = value.with_total_count(count);
        }
        debug!(
            element_type = %self.element_type,
            returned = value.len(),
            truncated = value.is_truncated(),
            "applied query"
        );
        Ok(QueryResult {
            value,
            total_count,
            next_page_cursor,
        })
    }

    /// Rows that belong to the result: `$apply`, `$compute`, `$filter`, `$search`.
    fn members(&self, rows: Rows<'_>) -> Result<Vec<Arc<Record>>, ExecutionError> {
        let rows = rows.collect::<Result<Vec<_>, _>>()?;
        let scanned = rows.len();
        let mut rows = apply_transformations(rows, &self.plan.apply, &self.params)?;
        if !self.plan.compute.is_empty() {
            rows = rows
                .into_iter()
                .map(|row| self.compute(&row))
                .collect::<Result<_, _>>()?;
        }
        if let Some(filter) = &self.plan.filter {
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                let it = Value::Record(row.clone());
                if filter.matches(&Scope::root(&it, &self.params))? {
                    kept.push(row);
                }
            }
            rows = kept;
        }
        if let Some(search) = &self.search {
            rows.retain(|row| search::search_matches(self.matcher.as_ref(), row, search));
        }
        debug!(element_type = %self.element_type, scanned, matched = rows.len(), "selected rows");
        Ok(rows)
    }

    fn compute(&self, row: &Arc<Record>) -> Result<Arc<Record>, ExecutionError> {
        let it = Value::Record(row.clone());
        let scope = Scope::root(&it, &self.params);
        let mut out = (**row).clone();
        for (alias, expr) in &self.plan.compute {
            out.set(alias.clone(), expr.eval(&scope)?);
        }
        Ok(Arc::new(out))
    }

    /// Apply the skip token, or `$skip` when there is none. Returns the
    /// absolute position of the first remaining row.
    fn resume(&self, sorted: Vec<Keyed>) -> (usize, Vec<Keyed>) {
        match &self.cursor {
            Some(SkipToken {
                offset: Some(n), ..
            }) => (*n, sorted.into_iter().skip(*n).collect()),
            Some(token) => {
                let rest: Vec<Keyed> = sorted
                    .into_iter()
                    .filter(|(keys, _)| token.is_after(keys, &self.directions))
                    .collect();
                (0, rest)
            }
            None => {
                let n = self.skip.unwrap_or(0);
                (n, sorted.into_iter().skip(n).collect())
            }
        }
    }

    fn next_cursor(
        &self,
        start: usize,
        page: &TruncatedCollection<Keyed>,
    ) -> Result<Option<String>, ExecutionError> {
        let Some((keys, _)) = page.last() else {
            return Ok(None);
        };
        let remaining = self.top.map(|top| top.saturating_sub(page.len()));
        if remaining == Some(0) {
            return Ok(None);
        }
        let order = self.order_signature.clone();
        let token = if self.keyset {
            SkipToken::keyset(keys, order, self.filter_hash.clone())
        } else {
            SkipToken::offset(start + page.len(), order, self.filter_hash.clone())
        };
        token
            .with_remaining_top(remaining)
            .encode()
            .map(Some)
            .map_err(|e| ExecutionError::TypeError(format!("cannot encode skip token: {e}")))
    }
}

/// Whether `order` sorts by every stable key. Rows tying on such an ordering
/// are the same row, so the last row's values are a safe resume point.
fn covers_keys(order: &[BoundOrderBy], stable_keys: &[BoundOrderBy]) -> bool {
    !stable_keys.is_empty()
        && stable_keys.iter().all(|key| {
            let text = key.expr.to_string();
            order.iter().any(|o| o.expr.to_string() == text)
        })
}

/// A query bound to a source but not yet enumerated.
pub struct ComposedQuery<'s, S: DataSource + ?Sized> {
    source: &'s S,
    pipeline: Pipeline,
}

impl<'s, S: DataSource + ?Sized> ComposedQuery<'s, S> {
    #[must_use]
    pub const fn new(source: &'s S, pipeline: Pipeline) -> Self {
        Self { source, pipeline }
    }

    #[must_use]
    pub const fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Enumerate the source and materialize the result.
    ///
    /// # Errors
    /// Returns [`Error::Execution`] when evaluation or the source fails.
    pub fn execute(&self) -> Result<QueryResult, Error> {
        self.pipeline.run(self.source.scan())
    }

    /// Number of rows the query selects, ignoring paging.
    ///
    /// # Errors
    /// Returns [`Error::Execution`] when evaluation or the source fails.
    pub fn count(&self) -> Result<u64, Error> {
        let rows = self.pipeline.members(self.source.scan())?;
        Ok(u64::try_from(rows.len()).unwrap_or(u64::MAX))
    }
}

/// Prepare `query` against `source` without enumerating it.
///
/// # Errors
/// Returns an error for an undecodable or mismatched `$skiptoken`.
pub fn compose<'s, S: DataSource + ?Sized>(
    source: &'s S,
    query: &BoundQuery,
    settings: &QuerySettings,
) -> Result<ComposedQuery<'s, S>, Error> {
    let pipeline = Pipeline::new(query, settings, source.null_propagation())?;
    Ok(ComposedQuery::new(source, pipeline))
}

/// Apply `query` to `source` eagerly.
///
/// # Errors
/// Returns an error for a bad `$skiptoken` or a failing evaluation.
pub fn apply_to<S: DataSource + ?Sized>(
    source: &S,
    query: &BoundQuery,
    settings: &QuerySettings,
) -> Result<QueryResult, Error> {
    compose(source, query, settings)?.execute()
}
