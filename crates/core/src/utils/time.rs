//! Timestamp helpers. Stored timestamps are RFC 3339 UTC with millisecond
//! precision so they order lexically.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::errors::{Error, Result, ValidationError};

pub fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_rfc3339() -> String {
    to_rfc3339(Utc::now())
}

pub fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            Error::Validation(ValidationError::invalid(format!(
                "Invalid timestamp '{}': {}",
                value, e
            )))
        })
}

/// Milliseconds from now until `target`, or `None` if it is already past.
pub fn millis_until_rfc3339(target: &str) -> Option<u64> {
    let target = parse_rfc3339(target).ok()?;
    let delta = target.signed_duration_since(Utc::now()).num_milliseconds();
    if delta <= 0 {
        None
    } else {
        Some(delta as u64)
    }
}
