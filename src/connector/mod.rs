//! # Connector Registry (C2)
//!
//! A connector is a typed, labelled handle resolved from config to a
//! concrete backend driver (§4.2, GLOSSARY). This module defines the
//! closed set of connector kinds and the `type:label` key grammar; actual
//! backend drivers (the SQL/API/Valkey/plugin I/O) live behind the
//! `InstanceStorage` (C4) and `FetchConnector` (C5) traits in
//! `crate::storage` and `crate::connector::fetch` -- a connector here is
//! just the resolved *attributes* a driver is constructed from, mirroring
//! the teacher's `ExtractorIdentity` (a `Chain` + name pair that *refers
//! to* an extractor without *being* one).

pub mod fetch;
pub mod registry;

pub use fetch::FetchConnector;
pub use registry::ConnectorRegistry;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::McError;

/// The core connector variants named in spec.md §4.2. Plugin-registered
/// kinds extend this at startup (§4.2 point 4); represented here as
/// `Other(String)` so the closed set doesn't have to be recompiled to add
/// one, mirroring "additional variants may be registered at startup".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    Sql,
    Api,
    Valkey,
    Plugin,
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorKind::Sql => write!(f, "sql"),
            ConnectorKind::Api => write!(f, "api"),
            ConnectorKind::Valkey => write!(f, "valkey"),
            ConnectorKind::Plugin => write!(f, "plugin"),
            ConnectorKind::Other(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for ConnectorKind {
    type Err = McError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "sql" => ConnectorKind::Sql,
            "api" => ConnectorKind::Api,
            "valkey" => ConnectorKind::Valkey,
            "plugin" => ConnectorKind::Plugin,
            other => ConnectorKind::Other(other.to_string()),
        })
    }
}

/// A `type:label` connector key, e.g. `sql:main`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectorKeys {
    pub kind: ConnectorKind,
    pub label: String,
}

impl ConnectorKeys {
    pub fn new(kind: ConnectorKind, label: impl Into<String>) -> Self {
        Self { kind, label: label.into() }
    }
}

impl fmt::Display for ConnectorKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.label)
    }
}

impl FromStr for ConnectorKeys {
    type Err = McError;

    /// Splits `type:label` the way `connectors/parse.py::parse_connector_keys`
    /// does: colon-delimited, label optional and defaulting to the
    /// configured default label (`"main"`) when omitted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, ':');
        let kind_str = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| McError::config(format!("empty connector keys '{s}'")))?;
        let label = parts.next().unwrap_or(registry::DEFAULT_LABEL).to_string();
        Ok(ConnectorKeys { kind: kind_str.parse()?, label })
    }
}

/// Resolved connector attributes: the merged (label override over
/// `<type>.default`) configuration subtree for one `ConnectorKeys`,
/// before a backend driver is built from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Connector {
    pub keys: ConnectorKeys,
    pub attributes: HashMap<String, JsonValue>,
}

impl Connector {
    pub fn new(keys: ConnectorKeys, attributes: HashMap<String, JsonValue>) -> Self {
        Self { keys, attributes }
    }

    pub fn attribute(&self, key: &str) -> Option<&JsonValue> {
        self.attributes.get(key)
    }

    /// Whether this connector is reachable only over plaintext HTTP, used
    /// by the chaining permission check in §4.2.
    pub fn is_insecure_http(&self) -> bool {
        match self.attribute("uri").and_then(|v| v.as_str()) {
            Some(uri) => uri.starts_with("http://"),
            None => false,
        }
    }
}
