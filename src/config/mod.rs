//! # Config & Key Resolution (C9)
//!
//! Layered configuration the way `meerschaum/config/` builds it: a
//! built-in default tree, overlaid by files read from a config directory,
//! overlaid by environment variables, overlaid by a one-shot
//! per-invocation patch (§4.7). Values may reference other values via the
//! `MRSM{a:b:c}` substitution syntax (`substitute` submodule), and
//! connector attributes may additionally be supplied wholesale through
//! `MRSM_<TYPE>_<LABEL>` environment variables (`environment` submodule).

pub mod default;
pub mod environment;
pub mod substitute;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use crate::error::McError;

/// Env var holding a path to an additional config file merged on top of
/// the config directory (`MRSM_CONFIG` in the original).
pub const ENV_CONFIG: &str = "MRSM_CONFIG";
/// Env var holding a JSON patch merged on top of everything else for the
/// lifetime of one process (`MRSM_PATCH`).
pub const ENV_PATCH: &str = "MRSM_PATCH";
/// Env var overriding the root directory config files are read from
/// (`MRSM_ROOT_DIR`).
pub const ENV_ROOT_DIR: &str = "MRSM_ROOT_DIR";
/// Env var that, when truthy, forbids interactive prompts (`MRSM_NOASK`).
pub const ENV_NOASK: &str = "MRSM_NOASK";

/// The round-trip key recording which leaf values were last substituted
/// from a `MRSM{}` reference, so a later write-back doesn't flatten the
/// reference into a literal (§ SUPPLEMENTED FEATURES, `_read_config.py`).
pub const SYMLINKS_KEY: &str = "_symlinks";

/// The fully resolved, layered configuration tree.
///
/// Internally this is just a `serde_json::Value::Object` -- config in the
/// original is an arbitrarily nested dict of heterogeneous settings, and
/// nothing in the pack models that more strongly than `json!` does (the
/// teacher's own `config/` equivalent is a handful of top-level structs,
/// which doesn't fit a tree whose shape is only known at runtime).
#[derive(Debug, Clone, Default)]
pub struct Config {
    root: JsonValue,
}

impl Config {
    /// Builds the full layering: defaults -> root-dir files -> `MRSM_CONFIG`
    /// file -> environment variables -> `MRSM_PATCH`.
    #[instrument(skip_all)]
    pub fn load() -> Result<Self, McError> {
        let mut root = default::default_config();

        let root_dir = root_dir();
        if root_dir.is_dir() {
            for entry in read_config_dir(&root_dir)? {
                merge_json(&mut root, entry);
            }
        }

        if let Ok(path) = std::env::var(ENV_CONFIG) {
            let extra = read_config_file(Path::new(&path))?;
            merge_json(&mut root, extra);
        }

        environment::apply_environment_config(&mut root);

        if let Ok(patch_raw) = std::env::var(ENV_PATCH) {
            let patch: JsonValue = serde_json::from_str(&patch_raw)
                .map_err(|e| McError::config(format!("MRSM_PATCH is not valid JSON: {e}")))?;
            merge_json(&mut root, patch);
        }

        substitute::resolve_all(&mut root);
        debug!("config loaded");
        Ok(Config { root })
    }

    pub fn from_value(root: JsonValue) -> Self {
        Config { root }
    }

    /// Resolves a dotted path, e.g. `"meerschaum.connectors.sql.main"`.
    pub fn get_path(&self, path: &str) -> Option<&JsonValue> {
        let mut cursor = &self.root;
        for segment in path.split('.') {
            cursor = cursor.as_object()?.get(segment)?;
        }
        Some(cursor)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get_path(path).and_then(|v| v.as_str())
    }

    pub fn root(&self) -> &JsonValue {
        &self.root
    }

    pub fn noask() -> bool {
        std::env::var(ENV_NOASK)
            .map(|v| matches!(v.as_str(), "1" | "true" | "True"))
            .unwrap_or(false)
    }
}

fn root_dir() -> PathBuf {
    std::env::var(ENV_ROOT_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs_home().join(".config").join("meerschaum")
        })
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

fn read_config_dir(dir: &Path) -> Result<Vec<JsonValue>, McError> {
    let mut out = Vec::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| McError::config(format!("cannot read config dir {}: {e}", dir.display())))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml" | "json")))
        .collect();
    paths.sort();
    for path in paths {
        out.push(read_config_file(&path)?);
    }
    Ok(out)
}

fn read_config_file(path: &Path) -> Result<JsonValue, McError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| McError::config(format!("cannot read {}: {e}", path.display())))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&text)
            .map_err(|e| McError::config(format!("{}: invalid json: {e}", path.display()))),
        _ => serde_yaml::from_str(&text)
            .map_err(|e| McError::config(format!("{}: invalid yaml: {e}", path.display()))),
    }
}

/// Deep-merges `patch` into `base`, objects recursively and everything
/// else (including arrays) by overwrite -- matches the "later layers win,
/// wholesale at the leaf" semantics of the original's `cascade_dictionary`.
pub fn merge_json(base: &mut JsonValue, patch: JsonValue) {
    match (base, patch) {
        (JsonValue::Object(base_map), JsonValue::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value;
        }
    }
}

/// A flat view of a connector's resolved attributes, used by
/// `crate::connector::registry`.
pub fn connector_attributes(config: &Config, kind: &str, label: &str) -> HashMap<String, JsonValue> {
    let mut merged = JsonValue::Object(Default::default());
    if let Some(default_attrs) = config.get_path(&format!("meerschaum.connectors.{kind}.default")) {
        merge_json(&mut merged, default_attrs.clone());
    }
    if let Some(label_attrs) = config.get_path(&format!("meerschaum.connectors.{kind}.{label}")) {
        merge_json(&mut merged, label_attrs.clone());
    }
    environment::apply_connector_env(&mut merged, kind, label);
    match merged {
        JsonValue::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_is_deep_and_last_write_wins() {
        let mut base = json!({"a": {"x": 1, "y": 2}});
        merge_json(&mut base, json!({"a": {"y": 3, "z": 4}}));
        assert_eq!(base, json!({"a": {"x": 1, "y": 3, "z": 4}}));
    }

    #[test]
    fn connector_attributes_layer_default_under_label() {
        let config = Config::from_value(json!({
            "meerschaum": {
                "connectors": {
                    "sql": {
                        "default": {"port": 5432, "host": "localhost"},
                        "main": {"host": "prod-db"}
                    }
                }
            }
        }));
        let attrs = connector_attributes(&config, "sql", "main");
        assert_eq!(attrs["host"], json!("prod-db"));
        assert_eq!(attrs["port"], json!(5432));
    }
}
