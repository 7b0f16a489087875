//! Request-level entry points tying the pipeline stages together.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use odata_edm::{EdmModel, Record};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::apply::{
    self, ComposedQuery, ContainsMatcher, DataSource, Pipeline, QueryResult, SearchMatcher,
};
use crate::bind::functions::FunctionRegistry;
use crate::bind::{BindTarget, BoundQuery, bind_query};
use crate::compile::PlanCache;
use crate::error::{Error, ExecutionError};
use crate::settings::{ODataConfig, ParserSettings, QuerySettings, ValidationSettings};
use crate::syntax::{ParsedQuery, parse_query};
use crate::validate::{check_query_length, validate};

/// Parsed query options of one request.
#[derive(Clone, Debug, PartialEq)]
pub struct ODataQueryOptions {
    raw: String,
    parsed: ParsedQuery,
}

impl ODataQueryOptions {
    /// Check the length limit, then parse.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] for an over-long query or [`Error::Parse`]
    /// for malformed syntax.
    pub fn parse(
        raw: &str,
        parser: &ParserSettings,
        validation: &ValidationSettings,
    ) -> Result<Self, Error> {
        check_query_length(raw, validation)?;
        Ok(Self {
            raw: raw.to_owned(),
            parsed: parse_query(raw, parser)?,
        })
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub const fn parsed(&self) -> &ParsedQuery {
        &self.parsed
    }

    /// Bind against the model and validate.
    ///
    /// # Errors
    /// Returns [`Error::Bind`] or [`Error::Validation`].
    pub fn bind(
        &self,
        model: &Arc<EdmModel>,
        target: &BindTarget,
        functions: &FunctionRegistry,
        validation: &ValidationSettings,
    ) -> Result<BoundQuery, Error> {
        let bound = bind_query(
            &self.parsed,
            model,
            target,
            functions,
            validation.max_expansion_depth,
        )?;
        validate(&bound, validation)?;
        Ok(bound)
    }

    /// Bind, validate and apply to `source` in one step.
    ///
    /// # Errors
    /// Returns the first error of any stage.
    pub fn apply_to<S: DataSource + ?Sized>(
        &self,
        source: &S,
        model: &Arc<EdmModel>,
        target: &BindTarget,
        functions: &FunctionRegistry,
        config: &ODataConfig,
    ) -> Result<QueryResult, Error> {
        let bound = self.bind(model, target, functions, &config.validation)?;
        apply::apply_to(source, &bound, &config.query)
    }
}

/// Shared, thread-safe front door: one model, one configuration, one plan cache.
#[derive(Clone)]
pub struct QueryEngine {
    model: Arc<EdmModel>,
    config: Arc<ODataConfig>,
    functions: Arc<FunctionRegistry>,
    plans: Arc<PlanCache>,
    matcher: Arc<dyn SearchMatcher>,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("config", &self.config)
            .field("cached_plans", &self.plans.len())
            .finish_non_exhaustive()
    }
}

impl QueryEngine {
    #[must_use]
    pub fn new(model: Arc<EdmModel>, config: Arc<ODataConfig>) -> Self {
        Self {
            model,
            config,
            functions: Arc::new(FunctionRegistry::new()),
            plans: Arc::new(PlanCache::new()),
            matcher: Arc::new(ContainsMatcher),
        }
    }

    #[must_use]
    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = Arc::new(functions);
        self
    }

    #[must_use]
    pub fn with_search_matcher(mut self, matcher: Arc<dyn SearchMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    #[must_use]
    pub const fn model(&self) -> &Arc<EdmModel> {
        &self.model
    }

    #[must_use]
    pub const fn config(&self) -> &Arc<ODataConfig> {
        &self.config
    }

    #[must_use]
    pub fn plan_cache(&self) -> &PlanCache {
        &self.plans
    }

    /// Target for an entity set of the model.
    ///
    /// # Errors
    /// Returns [`Error::Bind`] when the entity set does not exist.
    pub fn entity_set(&self, name: &str) -> Result<BindTarget, Error> {
        Ok(BindTarget::entity_set(&self.model, name)?)
    }

    /// Parse `raw` with the configured parser and length limit.
    ///
    /// # Errors
    /// Returns [`Error::Parse`] or [`Error::Validation`].
    pub fn parse(&self, raw: &str) -> Result<ODataQueryOptions, Error> {
        ODataQueryOptions::parse(raw, &self.config.parser, &self.config.validation)
    }

    /// Parse, bind and validate.
    ///
    /// # Errors
    /// Returns the first parse, bind or validation error.
    pub fn bind(&self, target: &BindTarget, raw: &str) -> Result<BoundQuery, Error> {
        let bound = self
            .parse(raw)?
            .bind(&self.model, target, &self.functions, &self.config.validation)?;
        debug!(element_type = %bound.element_type, "bound and validated query");
        Ok(bound)
    }

    /// Compile a bound query through the shared plan cache.
    ///
    /// # Errors
    /// Returns an error for an undecodable or mismatched `$skiptoken`.
    pub fn pipeline(
        &self,
        bound: &BoundQuery,
        settings: &QuerySettings,
        source_prefers_nulls: bool,
    ) -> Result<Pipeline, Error> {
        Pipeline::prepare(
            bound,
            settings,
            source_prefers_nulls,
            Some(&self.plans),
            self.matcher.clone(),
        )
    }

    /// Run `raw` over `source` eagerly.
    ///
    /// # Errors
    /// Returns the first error of any stage.
    pub fn execute<S: DataSource + ?Sized>(
        &self,
        target: &BindTarget,
        raw: &str,
        source: &S,
    ) -> Result<QueryResult, Error> {
        self.compose(target, raw, source)?.execute()
    }

    /// Prepare `raw` over `source` without enumerating it.
    ///
    /// # Errors
    /// Returns the first parse, bind, validation or skip-token error.
    pub fn compose<'s, S: DataSource + ?Sized>(
        &self,
        target: &BindTarget,
        raw: &str,
        source: &'s S,
    ) -> Result<ComposedQuery<'s, S>, Error> {
        let bound = self.bind(target, raw)?;
        let pipeline = self.pipeline(&bound, &self.config.query, source.null_propagation())?;
        Ok(ComposedQuery::new(source, pipeline))
    }

    /// Run `raw` over an asynchronous record stream.
    ///
    /// # Errors
    /// Returns the first error of any stage, [`ExecutionError::Cancelled`]
    /// or [`ExecutionError::TimedOut`].
    pub async fn execute_stream<St>(
        &self,
        target: &BindTarget,
        raw: &str,
        stream: St,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<QueryResult, Error>
    where
        St: Stream<Item = Result<Record, ExecutionError>>,
    {
        let bound = self.bind(target, raw)?;
        let pipeline = self.pipeline(&bound, &self.config.query, true)?;
        apply::apply_to_stream(stream, &pipeline, cancel, timeout).await
    }
}
