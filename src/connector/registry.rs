//! Connector resolution and caching, grounded on
//! `connectors/parse.py` (`parse_connector_keys`, `parse_instance_keys`,
//! `parse_repo_keys`) and on the teacher's `ExtractorHandle` memoisation
//! pattern in `extractor/runner.rs` (build once, hand out clones of an
//! `Arc` afterwards).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, instrument};

use super::{Connector, ConnectorKeys, ConnectorKind};
use crate::config::{connector_attributes, Config};
use crate::error::McError;

/// The label used when a `type:label` key omits its label, e.g. `"sql"`
/// alone means `sql:main`.
pub const DEFAULT_LABEL: &str = "main";

/// Resolves and caches `Connector`s against a `Config`.
pub struct ConnectorRegistry {
    config: Arc<Config>,
    cache: RwLock<HashMap<ConnectorKeys, Arc<Connector>>>,
}

impl ConnectorRegistry {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config, cache: RwLock::new(HashMap::new()) }
    }

    /// Resolves `keys` to a `Connector`, building and caching it on first
    /// use. Subsequent calls with the same keys return the cached `Arc`
    /// without re-reading config.
    #[instrument(skip(self))]
    pub fn get_connector(&self, keys: &ConnectorKeys) -> Result<Arc<Connector>, McError> {
        if let Some(existing) = self.cache.read().expect("registry lock poisoned").get(keys) {
            return Ok(Arc::clone(existing));
        }
        let attributes = connector_attributes(&self.config, &keys.kind.to_string(), &keys.label);
        if attributes.is_empty() {
            return Err(McError::connector(format!(
                "no configuration found for connector '{keys}'"
            )));
        }
        let connector = Arc::new(Connector::new(keys.clone(), attributes));
        self.cache
            .write()
            .expect("registry lock poisoned")
            .insert(keys.clone(), Arc::clone(&connector));
        debug!(%keys, "resolved connector");
        Ok(connector)
    }

    /// Validates that `candidate` may serve as an instance connector
    /// chained behind another instance connector, per §4.2's chaining
    /// restriction: API instance connectors must be reachable over https
    /// unless `meerschaum.permissions.chaining.insecure_parent_instance`
    /// is explicitly set.
    pub fn allows_chaining(&self, candidate: &Connector) -> bool {
        if candidate.keys.kind != ConnectorKind::Api {
            return true;
        }
        if !candidate.is_insecure_http() {
            return true;
        }
        self.config
            .get_path("meerschaum.permissions.chaining.insecure_parent_instance")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Parses `s` as connector keys, defaulting an omitted label to `"main"`.
/// Grounded on `parse_connector_keys`.
pub fn parse_connector_keys(s: &str) -> Result<ConnectorKeys, McError> {
    s.parse()
}

/// Parses `s` as instance keys. Identical grammar to connector keys, but
/// kept as a distinct entry point because the original's `parse_instance_keys`
/// additionally restricts the allowed `ConnectorKind`s (an instance must be
/// a `sql` or `api` connector, never `plugin`).
pub fn parse_instance_keys(s: &str) -> Result<ConnectorKeys, McError> {
    let keys: ConnectorKeys = s.parse()?;
    match keys.kind {
        ConnectorKind::Sql | ConnectorKind::Api => Ok(keys),
        other => Err(McError::config(format!(
            "'{other}' connectors cannot serve as an instance"
        ))),
    }
}

/// Parses `s` as repository keys, defaulting to the `api:` type the way
/// `parse_repo_keys` does (repositories are always API connectors) and
/// falling back to the configured `default_repository` when `s` is empty.
pub fn parse_repo_keys(s: &str, config: &Config) -> Result<ConnectorKeys, McError> {
    if s.is_empty() {
        let default = config
            .get_str("meerschaum.default_repository")
            .ok_or_else(|| McError::config("no default_repository configured"))?;
        return parse_repo_keys(default, config);
    }
    if s.contains(':') {
        return s.parse();
    }
    Ok(ConnectorKeys::new(ConnectorKind::Api, s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_with_sql_main() -> Arc<Config> {
        Arc::new(Config::from_value(json!({
            "meerschaum": {
                "connectors": {
                    "sql": {"default": {"port": 5432}, "main": {"host": "localhost"}}
                }
            }
        })))
    }

    #[test]
    fn resolves_and_caches_connector() {
        let registry = ConnectorRegistry::new(config_with_sql_main());
        let keys: ConnectorKeys = "sql:main".parse().unwrap();
        let first = registry.get_connector(&keys).unwrap();
        let second = registry.get_connector(&keys).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_connector_is_a_config_error() {
        let registry = ConnectorRegistry::new(config_with_sql_main());
        let keys: ConnectorKeys = "sql:ghost".parse().unwrap();
        let err = registry.get_connector(&keys).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Connector);
    }

    #[test]
    fn parse_instance_keys_rejects_plugin() {
        assert!(parse_instance_keys("plugin:foo").is_err());
        assert!(parse_instance_keys("sql:main").is_ok());
    }

    #[test]
    fn parse_repo_keys_defaults_to_api() {
        let config = config_with_sql_main();
        let keys = parse_repo_keys("mrsm", &config).unwrap();
        assert_eq!(keys, ConnectorKeys::new(ConnectorKind::Api, "mrsm"));
    }
}
