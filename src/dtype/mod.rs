//! # Type & Dtype System (C1)
//!
//! The closed set of logical dtypes a pipe's columns may be declared as,
//! per spec.md §4.1. A pipe's `parameters.dtypes` map (§3) stores these as
//! strings; this module is the single place that parses, displays, infers,
//! and enforces them.
//!
//! Mirrors the teacher's `models::Chain` in spirit -- a small closed enum
//! with a `Display`/`FromStr` pair derived via `strum` -- but `Dtype`
//! carries data (`numeric`'s precision/scale, `datetime`'s tz regime) so
//! it's hand-written rather than derived.

mod enforce;
mod infer;
mod tz;

pub use enforce::enforce_dtypes;
pub use infer::infer_dtypes;
pub use tz::TzRegime;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::McError;

/// A column's logical dtype, as declared in `parameters.dtypes` or
/// inferred by `infer_dtypes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dtype {
    Int,
    Float,
    Bool,
    Str,
    Bytes,
    Uuid,
    Numeric { precision: Option<u32>, scale: Option<u32> },
    Json,
    DateTime(TzRegime),
    Object,
}

impl Dtype {
    /// Whether a column declared with this dtype participates in the
    /// datetime/tz normalisation rules of §4.1.
    pub fn is_datetime(&self) -> bool {
        matches!(self, Dtype::DateTime(_))
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dtype::Int => write!(f, "int"),
            Dtype::Float => write!(f, "float"),
            Dtype::Bool => write!(f, "bool"),
            Dtype::Str => write!(f, "str"),
            Dtype::Bytes => write!(f, "bytes"),
            Dtype::Uuid => write!(f, "uuid"),
            Dtype::Numeric { precision: Some(p), scale: Some(s) } => {
                write!(f, "numeric({p},{s})")
            }
            Dtype::Numeric { .. } => write!(f, "numeric"),
            Dtype::Json => write!(f, "json"),
            Dtype::DateTime(regime) => write!(f, "{regime}"),
            Dtype::Object => write!(f, "object"),
        }
    }
}

impl FromStr for Dtype {
    type Err = McError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(regime) = tz::parse_datetime_dtype(s) {
            return Ok(Dtype::DateTime(regime));
        }
        if let Some(rest) = s.strip_prefix("numeric") {
            let rest = rest.trim();
            if rest.is_empty() {
                return Ok(Dtype::Numeric { precision: None, scale: None });
            }
            let inner = rest
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(')'))
                .ok_or_else(|| invalid(s))?;
            let mut parts = inner.split(',').map(|p| p.trim());
            let precision = parts
                .next()
                .ok_or_else(|| invalid(s))?
                .parse::<u32>()
                .map_err(|_| invalid(s))?;
            let scale = parts
                .next()
                .ok_or_else(|| invalid(s))?
                .parse::<u32>()
                .map_err(|_| invalid(s))?;
            return Ok(Dtype::Numeric { precision: Some(precision), scale: Some(scale) });
        }
        match s {
            "int" | "int64" => Ok(Dtype::Int),
            "float" | "float64" => Ok(Dtype::Float),
            "bool" | "boolean" => Ok(Dtype::Bool),
            "str" | "string" => Ok(Dtype::Str),
            "bytes" => Ok(Dtype::Bytes),
            "uuid" => Ok(Dtype::Uuid),
            "json" => Ok(Dtype::Json),
            "object" => Ok(Dtype::Object),
            _ => Err(invalid(s)),
        }
    }
}

fn invalid(s: &str) -> McError {
    McError::schema("dtype", 0, format!("'{s}' is not a recognised dtype string"))
}

/// A column-name -> dtype map, as persisted in `parameters.dtypes`.
pub type DtypeMap = HashMap<String, Dtype>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_closed_set() {
        let cases = [
            "int",
            "float",
            "bool",
            "str",
            "bytes",
            "uuid",
            "numeric",
            "numeric(10,2)",
            "json",
            "datetime[ns]",
            "datetime[ns, UTC]",
            "datetime[ns, America/New_York]",
            "object",
        ];
        for case in cases {
            let dtype: Dtype = case.parse().unwrap();
            // Not a byte-for-byte round trip (e.g. "numeric" renders as "numeric"
            // regardless of missing precision) but must reparse losslessly.
            let rendered = dtype.to_string();
            let reparsed: Dtype = rendered.parse().unwrap();
            assert_eq!(dtype, reparsed);
        }
    }

    #[test]
    fn rejects_unknown_dtype() {
        assert!("not-a-dtype".parse::<Dtype>().is_err());
    }
}
