//! # Pipe Value Object (C3)
//!
//! A pipe is identified by the 4-tuple `(connector_keys, metric_key,
//! location_key, instance_keys)` (spec.md DATA MODEL) and carries an
//! arbitrary `parameters` bag from which columns, dtypes, indices, tags
//! and the target table name are all derived (`attributes` submodule).
//! Lifecycle operations (register/edit/clear/drop/delete) are in
//! `lifecycle`, delegating to whatever `InstanceStorage` (C4) backs the
//! pipe's instance connector.
//!
//! Grounded on `meerschaum/core/Pipe/__init__.py`: the constructor
//! validation (location key can't be the literal negation-prefixed
//! string), `meta` property (the 4-tuple as a dict), and `__str__`
//! rendering are all carried over in spirit.

pub mod attributes;
pub mod lifecycle;

use std::fmt;

use serde_json::Value as JsonValue;

use crate::connector::ConnectorKeys;
use crate::error::McError;

/// The string that may not be used literally as a location key, since the
/// original reserves it to mean "no location" in certain CLI contexts.
pub const NONE_LOCATION_SENTINEL: &str = "[None]";

/// The full identity of a pipe: which source connector feeds it, what
/// metric and (optional) location it represents, and which instance
/// connector stores it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipeKey {
    pub connector_keys: ConnectorKeys,
    pub metric_key: String,
    pub location_key: Option<String>,
    pub instance_keys: ConnectorKeys,
}

impl PipeKey {
    pub fn new(
        connector_keys: ConnectorKeys,
        metric_key: impl Into<String>,
        location_key: Option<String>,
        instance_keys: ConnectorKeys,
    ) -> Result<Self, McError> {
        let metric_key = metric_key.into();
        if metric_key.is_empty() {
            return Err(McError::config("metric_key must not be empty"));
        }
        if location_key.as_deref() == Some(NONE_LOCATION_SENTINEL) {
            return Err(McError::config(format!(
                "location_key may not be the literal sentinel '{NONE_LOCATION_SENTINEL}'"
            )));
        }
        Ok(Self { connector_keys, metric_key, location_key, instance_keys })
    }
}

impl fmt::Display for PipeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.connector_keys,
            self.metric_key,
            self.location_key.as_deref().unwrap_or("None")
        )
    }
}

/// A pipe: its identity plus a `parameters` bag (columns/dtypes/indices/
/// tags/target and connector-specific fetch settings, all schema-free at
/// this layer per §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Pipe {
    pub key: PipeKey,
    pub parameters: JsonValue,
}

impl Pipe {
    pub fn new(key: PipeKey, parameters: JsonValue) -> Self {
        Self { key, parameters }
    }

    /// The 4-tuple rendered the way `Pipe.meta` renders it, as a JSON
    /// object -- used for equality/display in logs and APIs.
    pub fn meta(&self) -> JsonValue {
        serde_json::json!({
            "connector_keys": self.key.connector_keys.to_string(),
            "metric_key": self.key.metric_key,
            "location_key": self.key.location_key,
            "instance_keys": self.key.instance_keys.to_string(),
        })
    }
}

impl fmt::Display for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}
