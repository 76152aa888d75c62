//! Derived attributes read out of `Pipe::parameters` (§3, §4.3 point "U").
//!
//! `parameters` is schema-free JSON; this module is the only place that
//! knows its conventional shape: `columns.{datetime,id,primary,...}`,
//! `dtypes.<column>`, `indices.<name>`, `tags`, `target`.

use std::collections::HashSet;

use super::Pipe;
use crate::dtype::{Dtype, DtypeMap};

impl Pipe {
    /// The column-role map, e.g. `columns.datetime -> "ts"`.
    pub fn columns(&self) -> std::collections::HashMap<String, String> {
        self.parameters
            .get("columns")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(role, col)| col.as_str().map(|c| (role.clone(), c.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn column(&self, role: &str) -> Option<String> {
        self.columns().get(role).cloned()
    }

    /// The table/collection name data is written to. Defaults to the
    /// pipe's key joined with underscores (§3): `connector_keys` with its
    /// `:` replaced, then `metric_key`, then `location_key` if the pipe
    /// has one. This is deliberately not `PipeKey`'s `Display` -- that
    /// form carries a literal `:` and stands in "None" for an absent
    /// location, neither of which is a valid identifier for a storage
    /// backend to create a table with.
    pub fn target(&self) -> String {
        self.parameters
            .get("target")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| {
                let mut target = format!(
                    "{}_{}",
                    self.key.connector_keys.to_string().replace(':', "_"),
                    self.key.metric_key
                );
                if let Some(location) = &self.key.location_key {
                    target.push('_');
                    target.push_str(location);
                }
                target
            })
    }

    pub fn tags(&self) -> Vec<String> {
        self.parameters
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    /// Whether the pipe is declared static (its schema is fixed and
    /// `sync_pipe` may not add columns), per §4.3 point 2.
    pub fn is_static(&self) -> bool {
        self.parameters.get("static").and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// The declared dtype map, parsed from `parameters.dtypes`. Invalid
    /// dtype strings are dropped rather than failing the whole pipe --
    /// they'll surface as a schema error the first time a row actually
    /// needs that column coerced.
    pub fn dtypes(&self) -> DtypeMap {
        self.parameters
            .get("dtypes")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(col, dtype_str)| {
                        let dtype_str = dtype_str.as_str()?;
                        let dtype: Dtype = dtype_str.parse().ok()?;
                        Some((col.clone(), dtype))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The effective unique constraint columns used by the filter-existing
    /// engine (§4.3 "U", §4.5), in precedence order:
    ///
    /// 1. `indices.primary`, if declared, alone.
    /// 2. the union of `columns.datetime`, `columns.id`, `columns.primary`,
    ///    whichever are declared.
    /// 3. none -- every incoming row is treated as new (pure append).
    pub fn unique_columns(&self) -> Vec<String> {
        if let Some(primary_index) = self
            .parameters
            .get("indices")
            .and_then(|v| v.get("primary"))
            .and_then(|v| v.as_str())
        {
            return vec![primary_index.to_string()];
        }

        let columns = self.columns();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for role in ["datetime", "id", "primary"] {
            if let Some(col) = columns.get(role) {
                if seen.insert(col.clone()) {
                    out.push(col.clone());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorKeys, ConnectorKind};
    use crate::pipe::PipeKey;
    use serde_json::json;

    fn pipe_with(parameters: serde_json::Value) -> Pipe {
        let key = PipeKey::new(
            ConnectorKeys::new(ConnectorKind::Sql, "main"),
            "temperature",
            None,
            ConnectorKeys::new(ConnectorKind::Sql, "local"),
        )
        .unwrap();
        Pipe::new(key, parameters)
    }

    #[test]
    fn primary_index_wins_over_column_union() {
        let pipe = pipe_with(json!({
            "columns": {"datetime": "ts", "id": "device_id"},
            "indices": {"primary": "custom_pk"}
        }));
        assert_eq!(pipe.unique_columns(), vec!["custom_pk".to_string()]);
    }

    #[test]
    fn falls_back_to_column_union_in_role_order() {
        let pipe = pipe_with(json!({
            "columns": {"id": "device_id", "datetime": "ts"}
        }));
        assert_eq!(
            pipe.unique_columns(),
            vec!["ts".to_string(), "device_id".to_string()]
        );
    }

    #[test]
    fn no_columns_means_no_unique_constraint() {
        let pipe = pipe_with(json!({}));
        assert!(pipe.unique_columns().is_empty());
    }

    #[test]
    fn default_target_joins_the_key_with_underscores_and_no_location() {
        let pipe = pipe_with(json!({}));
        assert_eq!(pipe.target(), "sql_main_temperature");
    }

    #[test]
    fn default_target_appends_the_location_when_present() {
        let key = PipeKey::new(
            ConnectorKeys::new(ConnectorKind::Sql, "main"),
            "temperature",
            Some("office".to_string()),
            ConnectorKeys::new(ConnectorKind::Sql, "local"),
        )
        .unwrap();
        let pipe = Pipe::new(key, json!({}));
        assert_eq!(pipe.target(), "sql_main_temperature_office");
    }

    #[test]
    fn explicit_target_parameter_wins() {
        let pipe = pipe_with(json!({"target": "custom_table"}));
        assert_eq!(pipe.target(), "custom_table");
    }
}
