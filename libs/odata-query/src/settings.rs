//! Query, validation and parser settings plus layered configuration loading.
//!
//! Configuration is an explicit value: load it once (defaults, then an
//! optional YAML file, then `ODATA_*` environment variables), validate it in
//! [`ODataConfig::new`], and pass it around by reference or `Arc`.

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How member access on a null value is treated while evaluating.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleNullPropagation {
    /// Defer to the data source's preference.
    #[default]
    Default,
    True,
    False,
}

impl HandleNullPropagation {
    #[must_use]
    pub const fn resolve(self, source_prefers: bool) -> bool {
        match self {
            HandleNullPropagation::Default => source_prefers,
            HandleNullPropagation::True => true,
            HandleNullPropagation::False => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Server-driven page size; `None` disables server paging.
    pub page_size: Option<usize>,
    pub enable_constant_parameterization: bool,
    pub handle_null_propagation: HandleNullPropagation,
    pub ensure_stable_ordering: bool,
    pub defer_expansion: bool,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            page_size: None,
            enable_constant_parameterization: true,
            handle_null_propagation: HandleNullPropagation::Default,
            ensure_stable_ordering: true,
            defer_expansion: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryOption {
    Filter,
    OrderBy,
    Select,
    Expand,
    Top,
    Skip,
    Count,
    Apply,
    Search,
    Compute,
    SkipToken,
}

impl QueryOption {
    pub const ALL: [QueryOption; 11] = [
        QueryOption::Filter,
        QueryOption::OrderBy,
        QueryOption::Select,
        QueryOption::Expand,
        QueryOption::Top,
        QueryOption::Skip,
        QueryOption::Count,
        QueryOption::Apply,
        QueryOption::Search,
        QueryOption::Compute,
        QueryOption::SkipToken,
    ];

    /// Canonical name with the `$` prefix.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            QueryOption::Filter => "$filter",
            QueryOption::OrderBy => "$orderby",
            QueryOption::Select => "$select",
            QueryOption::Expand => "$expand",
            QueryOption::Top => "$top",
            QueryOption::Skip => "$skip",
            QueryOption::Count => "$count",
            QueryOption::Apply => "$apply",
            QueryOption::Search => "$search",
            QueryOption::Compute => "$compute",
            QueryOption::SkipToken => "$skiptoken",
        }
    }

    /// Match a name with its `$` prefix, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|o| o.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for QueryOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    And,
    Or,
    Not,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Has,
    In,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArithmeticOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Negate,
}

/// Allow-list where `None` means "everything".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Allowed<T: Ord>(Option<BTreeSet<T>>);

impl<T: Ord> Default for Allowed<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T: Ord> Allowed<T> {
    #[must_use]
    pub const fn all() -> Self {
        Self(None)
    }

    #[must_use]
    pub fn only(items: impl IntoIterator<Item = T>) -> Self {
        Self(Some(items.into_iter().collect()))
    }

    #[must_use]
    pub fn allows<Q>(&self, item: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.0.as_ref().is_none_or(|set| set.contains(item))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    pub max_top: Option<usize>,
    pub max_skip: Option<usize>,
    pub max_expansion_depth: Option<usize>,
    pub max_any_all_depth: Option<usize>,
    pub max_node_count: Option<usize>,
    pub max_order_by_nodes: Option<usize>,
    pub max_query_length: Option<usize>,
    pub allowed_query_options: Allowed<QueryOption>,
    pub allowed_logical_operators: Allowed<LogicalOperator>,
    pub allowed_arithmetic_operators: Allowed<ArithmeticOperator>,
    /// Lower-case function names (`contains`, `year`, `Ns.Custom`).
    pub allowed_functions: Allowed<String>,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            max_top: None,
            max_skip: None,
            max_expansion_depth: Some(2),
            max_any_all_depth: Some(2),
            max_node_count: Some(100),
            max_order_by_nodes: Some(5),
            max_query_length: Some(8 * 1024),
            allowed_query_options: Allowed::all(),
            allowed_logical_operators: Allowed::all(),
            allowed_arithmetic_operators: Allowed::all(),
            allowed_functions: Allowed::all(),
        }
    }
}

impl ValidationSettings {
    /// Settings with every limit switched off.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self {
            max_top: None,
            max_skip: None,
            max_expansion_depth: None,
            max_any_all_depth: None,
            max_node_count: None,
            max_order_by_nodes: None,
            max_query_length: None,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserSettings {
    /// Accept `filter=...` as well as `$filter=...`.
    pub allow_no_dollar_prefix: bool,
    /// `$`-prefixed options passed through untouched instead of rejected.
    pub custom_options: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ODataConfig {
    pub query: QuerySettings,
    pub validation: ValidationSettings,
    pub parser: ParserSettings,
}

impl ODataConfig {
    /// Build a validated configuration.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for a zero page size or a zero limit.
    pub fn new(
        query: QuerySettings,
        validation: ValidationSettings,
        parser: ParserSettings,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            query,
            validation,
            parser,
        };
        config.validate()?;
        Ok(config)
    }

    /// Layered load: defaults, then `yaml` (when given), then `ODATA_*`
    /// environment variables with `__` separating nested keys
    /// (`ODATA_QUERY__PAGE_SIZE=50`).
    ///
    /// # Errors
    /// Returns [`ConfigError`] when a source cannot be read or the merged
    /// values are invalid.
    pub fn load(yaml: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(ODataConfig::default()));
        if let Some(path) = yaml {
            figment = figment.merge(Yaml::file(path));
        }
        Self::from_figment(&figment.merge(Env::prefixed("ODATA_").split("__")))
    }

    /// Extract from a caller-assembled figment.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when extraction fails or values are invalid.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: ODataConfig = figment
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.query.page_size == Some(0) {
            return Err(ConfigError::Invalid {
                field: "query.page_size",
                reason: "must be at least 1",
            });
        }
        let v = &self.validation;
        let limits = [
            ("validation.max_top", v.max_top),
            ("validation.max_expansion_depth", v.max_expansion_depth),
            ("validation.max_any_all_depth", v.max_any_all_depth),
            ("validation.max_node_count", v.max_node_count),
            ("validation.max_order_by_nodes", v.max_order_by_nodes),
            ("validation.max_query_length", v.max_query_length),
        ];
        if let Some((field, _)) = limits.into_iter().find(|(_, l)| *l == Some(0)) {
            return Err(ConfigError::Invalid {
                field,
                reason: "must be at least 1 when set",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = ODataConfig::new(
            QuerySettings::default(),
            ValidationSettings::default(),
            ParserSettings::default(),
        )
        .unwrap();
        assert!(c.query.ensure_stable_ordering);
        assert_eq!(c.validation.max_expansion_depth, Some(2));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let err = ODataConfig::new(
            QuerySettings {
                page_size: Some(0),
                ..QuerySettings::default()
            },
            ValidationSettings::default(),
            ParserSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "query.page_size", .. }));
    }

    #[test]
    fn allow_lists() {
        let ops = Allowed::only([LogicalOperator::Eq, LogicalOperator::And]);
        assert!(ops.allows(&LogicalOperator::Eq));
        assert!(!ops.allows(&LogicalOperator::Or));
        assert!(Allowed::<LogicalOperator>::all().allows(&LogicalOperator::Or));

        let funcs = Allowed::only(["contains".to_owned()]);
        assert!(funcs.allows("contains"));
        assert!(!funcs.allows("year"));
    }

    #[test]
    fn option_names_are_case_insensitive() {
        assert_eq!(QueryOption::from_name("$FILTER"), Some(QueryOption::Filter));
        assert_eq!(QueryOption::from_name("$skiptoken"), Some(QueryOption::SkipToken));
        assert_eq!(QueryOption::from_name("filter"), None);
    }
}
