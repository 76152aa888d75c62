//! Layered config and substitution (C9), exercised the way a caller
//! actually builds a `Config` and resolves connector attributes from it.

use serde_json::json;

use meerschaum_core::config::substitute::resolve_all;
use meerschaum_core::config::{connector_attributes, Config};

#[test]
fn substitution_resolves_a_reference_found_elsewhere_in_the_tree() {
    let mut root = json!({
        "meerschaum": {"instance": "sql:main"},
        "jobs": {"pool_size": 4, "default_instance": "MRSM{meerschaum:instance}"}
    });
    resolve_all(&mut root);
    assert_eq!(root["jobs"]["default_instance"], json!("sql:main"));
}

#[test]
fn connector_env_var_supplies_attributes_when_config_tree_is_empty() {
    let config = Config::from_value(json!({}));
    // SAFETY: test-only, no other test in this binary reads this name.
    std::env::set_var("MRSM_SQL_FROM_ENV", r#"{"host": "db-from-env", "port": 5432}"#);
    let attrs = connector_attributes(&config, "sql", "from_env");
    std::env::remove_var("MRSM_SQL_FROM_ENV");

    assert_eq!(attrs["host"], json!("db-from-env"));
    assert_eq!(attrs["port"], json!(5432));
}

#[test]
fn label_level_config_overrides_the_type_default() {
    let config = Config::from_value(json!({
        "meerschaum": {
            "connectors": {
                "valkey": {
                    "default": {"host": "localhost", "port": 6379},
                    "main": {"host": "cache.prod.internal"}
                }
            }
        }
    }));
    let attrs = connector_attributes(&config, "valkey", "main");
    assert_eq!(attrs["host"], json!("cache.prod.internal"));
    assert_eq!(attrs["port"], json!(6379));
}

#[test]
fn get_path_resolves_a_dotted_path() {
    let config = Config::from_value(json!({"meerschaum": {"instance": "sql:main"}}));
    assert_eq!(config.get_str("meerschaum.instance"), Some("sql:main"));
    assert_eq!(config.get_str("meerschaum.missing"), None);
}
