//! The `SuccessTuple` wire type used by every write-shaped operation.
//!
//! Grounded on spec.md §6 ("`SuccessTuple`. `[bool, string]` in any
//! serialised form.") and the teacher's habit of returning a plain
//! `Result<(), StorageError>` from write methods — we make the tuple a
//! first-class type instead, since unlike the teacher's storage trait,
//! ours must report success *with a message* even on the ok path (insert
//! counts, warnings).

use serde::{Deserialize, Serialize};
use std::fmt;

/// `(ok, message)`, serialized as a two-element JSON array to match the
/// wire form described in spec.md §6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "(bool, String)", from = "(bool, String)")]
pub struct SuccessTuple {
    pub ok: bool,
    pub message: String,
}

impl SuccessTuple {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { ok: true, message: message.into() }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self { ok: false, message: message.into() }
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }
}

impl From<SuccessTuple> for (bool, String) {
    fn from(value: SuccessTuple) -> Self {
        (value.ok, value.message)
    }
}

impl From<(bool, String)> for SuccessTuple {
    fn from((ok, message): (bool, String)) -> Self {
        Self { ok, message }
    }
}

impl fmt::Display for SuccessTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {:?})", self.ok, self.message)
    }
}
