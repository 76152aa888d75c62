//! Datetime tz regimes (§4.1) and the conversion rules between them.
//!
//! A pipe's datetime axis is sticky once chosen: tz-aware UTC, tz-naive, or
//! tz-aware in a named zone. This module is grounded on spec.md §4.1's
//! "Datetime normalisation" and "Mixed-tz ingestion" rules, and on the
//! teacher's `storage::Version`/`BlockOrTimestamp`, which is the closest
//! the teacher gets to a sticky-regime timestamp axis (all of its
//! timestamps are `NaiveDateTime`, i.e. permanently in the "naive" regime).

use std::fmt;

use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::row::Value;

/// The tz-awareness regime of a pipe's datetime axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TzRegime {
    Naive,
    Utc,
    Zoned(String),
}

impl fmt::Display for TzRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TzRegime::Naive => write!(f, "datetime[ns]"),
            TzRegime::Utc => write!(f, "datetime[ns, UTC]"),
            TzRegime::Zoned(zone) => write!(f, "datetime[ns, {zone}]"),
        }
    }
}

/// Parses `datetime[ns]`, `datetime[ns, UTC]` and `datetime[ns, <zone>]`.
/// Returns `None` if `s` isn't a datetime dtype string at all (the caller
/// falls through to the rest of the `Dtype` grammar).
pub(super) fn parse_datetime_dtype(s: &str) -> Option<TzRegime> {
    let inner = s.strip_prefix("datetime[")?.strip_suffix(']')?;
    let mut parts = inner.splitn(2, ',').map(|p| p.trim());
    let unit = parts.next()?;
    if unit != "ns" {
        return None;
    }
    match parts.next() {
        None => Some(TzRegime::Naive),
        Some("UTC") => Some(TzRegime::Utc),
        Some(zone) => Some(TzRegime::Zoned(zone.to_string())),
    }
}

/// Converts an already-parsed datetime value into the pipe's sticky
/// regime, per the "Mixed-tz ingestion" rule in §4.1:
///
/// - naive target, aware input -> convert to UTC, then strip tzinfo.
/// - aware (UTC or zoned) target, naive input -> assume the input is
///   already in the target's zone and attach it.
/// - otherwise convert directly.
pub fn normalise_to_regime(value: &Value, regime: &TzRegime) -> Value {
    match (value, regime) {
        (Value::DateTimeNaive(naive), TzRegime::Naive) => Value::DateTimeNaive(*naive),
        (Value::DateTimeNaive(naive), TzRegime::Utc) => {
            Value::DateTimeUtc(Utc.from_utc_datetime(naive))
        }
        (Value::DateTimeNaive(naive), TzRegime::Zoned(zone)) => {
            zoned_from_naive(*naive, zone)
        }
        (Value::DateTimeUtc(aware), TzRegime::Naive) => Value::DateTimeNaive(aware.naive_utc()),
        (Value::DateTimeUtc(aware), TzRegime::Utc) => Value::DateTimeUtc(*aware),
        (Value::DateTimeUtc(aware), TzRegime::Zoned(zone)) => {
            zoned_from_naive(aware.naive_utc(), zone)
        }
        (Value::DateTimeZoned(aware), TzRegime::Naive) => {
            Value::DateTimeNaive(aware.naive_utc())
        }
        (Value::DateTimeZoned(aware), TzRegime::Utc) => {
            Value::DateTimeUtc(aware.with_timezone(&Utc))
        }
        (Value::DateTimeZoned(aware), TzRegime::Zoned(zone)) => {
            zoned_from_naive(aware.naive_utc(), zone)
        }
        (other, _) => other.clone(),
    }
}

fn zoned_from_naive(naive: NaiveDateTime, zone: &str) -> Value {
    match zone.parse::<Tz>() {
        Ok(tz) => Value::DateTimeZoned(tz.from_utc_datetime(&naive)),
        // An unrecognised zone string degrades to naive rather than panicking;
        // the pipe's declared dtype is trusted, so this only fires if the
        // stored dtype string itself is stale/invalid.
        Err(_) => Value::DateTimeNaive(naive),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn naive_to_utc_assumes_utc() {
        let naive = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let converted = normalise_to_regime(&Value::DateTimeNaive(naive), &TzRegime::Utc);
        assert_eq!(converted, Value::DateTimeUtc(Utc.from_utc_datetime(&naive)));
    }

    #[test]
    fn utc_to_naive_strips_tzinfo() {
        let naive = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let aware = Utc.from_utc_datetime(&naive);
        let converted = normalise_to_regime(&Value::DateTimeUtc(aware), &TzRegime::Naive);
        assert_eq!(converted, Value::DateTimeNaive(naive));
    }
}
