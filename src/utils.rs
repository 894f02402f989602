use std::str::FromStr;

use bigdecimal::{BigDecimal, ParseBigDecimalError};
use chrono::{DateTime, Utc};

/// Decimal places supported for decimal signaling parameters.
pub const DECIMAL_SCALE: i64 = 2;

pub fn format_key(prefix: &str, key: &str) -> String {
    format!("{}:{}", prefix, key)
}

/// Converts a float received at an external boundary into fixed-point.
///
/// Goes through the shortest round-trip text form so that `0.1` becomes
/// exactly `0.1` rather than the binary expansion of the float. The value is
/// not rounded; callers check it with `fits_scale`.
pub fn decimal_from_f64(value: f64) -> Result<BigDecimal, ParseBigDecimalError> {
    BigDecimal::from_str(&value.to_string())
}

/// Whether `value` has no more than `DECIMAL_SCALE` decimal places
pub fn fits_scale(value: &BigDecimal) -> bool {
    value.round(DECIMAL_SCALE) == *value
}

/// Converts a fixed-point value to a float for an external boundary.
pub fn decimal_to_f64(value: &BigDecimal) -> f64 {
    value.round(DECIMAL_SCALE).to_string().parse().unwrap_or_default()
}

/// Whole minutes left until `valid_through`, never negative.
pub fn minutes_remaining(valid_through: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (valid_through - now).num_minutes().max(0)
}
