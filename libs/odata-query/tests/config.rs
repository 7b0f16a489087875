#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Layered configuration loading: defaults, YAML file, `ODATA_*` environment.

use std::io::Write;

use odata_query::{ConfigError, HandleNullPropagation, ODataConfig};
use tempfile::NamedTempFile;

const YAML: &str = r#"
query:
  page_size: 25
  handle_null_propagation: "false"
validation:
  max_top: 100
  max_expansion_depth: 4
parser:
  allow_no_dollar_prefix: true
"#;

fn yaml_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn defaults_without_sources() {
    temp_env::with_var_unset("ODATA_QUERY__PAGE_SIZE", || {
        let config = ODataConfig::load(None).unwrap();
        assert_eq!(config, ODataConfig::default());
        assert_eq!(config.validation.max_expansion_depth, Some(2));
        assert!(config.query.enable_constant_parameterization);
    });
}

#[test]
fn yaml_overrides_defaults() {
    let file = yaml_file(YAML);
    temp_env::with_var_unset("ODATA_QUERY__PAGE_SIZE", || {
        let config = ODataConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.query.page_size, Some(25));
        assert_eq!(config.query.handle_null_propagation, HandleNullPropagation::False);
        assert_eq!(config.validation.max_top, Some(100));
        assert_eq!(config.validation.max_expansion_depth, Some(4));
        // Untouched keys keep their defaults
        assert_eq!(config.validation.max_node_count, Some(100));
        assert!(config.parser.allow_no_dollar_prefix);
    });
}

#[test]
fn environment_overrides_yaml() {
    let file = yaml_file(YAML);
    temp_env::with_var("ODATA_QUERY__PAGE_SIZE", Some("50"), || {
        let config = ODataConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.query.page_size, Some(50));
        assert_eq!(config.validation.max_top, Some(100));
    });
}

#[test]
fn zero_page_size_is_rejected() {
    temp_env::with_var("ODATA_QUERY__PAGE_SIZE", Some("0"), || {
        let err = ODataConfig::load(None).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                field: "query.page_size",
                reason: "must be at least 1",
            }
        );
    });
}

#[test]
fn malformed_yaml_is_a_load_error() {
    let file = yaml_file("query: [not, a, map");
    temp_env::with_var_unset("ODATA_QUERY__PAGE_SIZE", || {
        let err = ODataConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)), "{err:?}");
    });
}
