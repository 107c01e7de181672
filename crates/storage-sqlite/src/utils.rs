//! Column conversions shared by repositories.

use std::str::FromStr;

use rust_decimal::Decimal;

use tillsync_core::errors::{DatabaseError, Error, Result};

pub(crate) fn enum_to_db<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.trim_matches('"').to_string())
}

pub(crate) fn enum_from_db<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    Ok(serde_json::from_str(&format!("\"{}\"", value))?)
}

/// Money is stored as decimal text with two fractional digits.
pub(crate) fn decimal_to_db(value: Decimal) -> String {
    let mut scaled = value.round_dp(2);
    scaled.rescale(2);
    scaled.to_string()
}

pub(crate) fn decimal_from_db(value: &str) -> Result<Decimal> {
    Decimal::from_str(value).map_err(|e| {
        Error::Database(DatabaseError::Internal(format!(
            "Corrupt decimal column value '{}': {}",
            value, e
        )))
    })
}

pub(crate) fn optional_decimal_from_db(value: Option<&str>) -> Result<Option<Decimal>> {
    value.map(decimal_from_db).transpose()
}
