//! The built-in configuration tree, before any file/env/patch layer is
//! applied. Minimal relative to the original's shipped defaults (which
//! cover shell colors, pip indices, and a dozen other concerns out of
//! scope here) -- just enough structure for `Config::get_path` to have
//! somewhere to land.

use serde_json::json;
use serde_json::Value as JsonValue;

pub fn default_config() -> JsonValue {
    json!({
        "meerschaum": {
            "connectors": {
                "sql": {"default": {}},
                "api": {"default": {}},
                "valkey": {"default": {}},
            },
            "instance": "sql:local",
            "default_repository": "api:mrsm",
            "permissions": {
                "chaining": {
                    "insecure_parent_instance": false,
                }
            },
            "schedule": {
                "min_seconds": 1,
            },
            "jobs": {
                "pool_size": 4,
            }
        }
    })
}
