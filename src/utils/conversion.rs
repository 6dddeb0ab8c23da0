//! Decimal conversions and bucket arithmetic.
//!
//! All financial figures are carried as `BigDecimal` and written out as plain
//! (non-exponent) decimal strings. Reference prices arrive as `f64` from the
//! price provider and are converted through their shortest decimal form.

use bigdecimal::{BigDecimal, RoundingMode};
use std::str::FromStr;

// ============================================
// Buckets
// ============================================

/// Width of one snapshot bucket in seconds.
///
/// Persisted bucket boundaries are derived from this value, so changing it
/// requires migrating the snapshot table.
pub const BUCKET_LENGTH: i64 = 300;

/// Align a unix timestamp (seconds) to the start of its bucket.
pub fn bucket_timestamp(timestamp: i64) -> i64 {
    timestamp - timestamp.rem_euclid(BUCKET_LENGTH)
}

// ============================================
// Decimal parsing
// ============================================

/// Parse a decimal string. Rejects anything that is not a finite number.
pub fn parse_decimal(value: &str) -> Option<BigDecimal> {
    BigDecimal::from_str(value.trim()).ok()
}

/// Convert a reference price to a decimal.
///
/// Goes through the shortest round-trip representation so that `0.1` becomes
/// `0.1` rather than its binary expansion. Returns `None` for NaN and
/// infinities.
pub fn decimal_from_f64(value: f64) -> Option<BigDecimal> {
    if !value.is_finite() {
        return None;
    }
    BigDecimal::from_str(&value.to_string()).ok()
}

/// Scale a raw on-chain integer amount down by `10^decimals`.
///
/// Exact: only the decimal exponent changes.
pub fn shift_decimals(value: &BigDecimal, decimals: u32) -> BigDecimal {
    let (digits, scale) = value.as_bigint_and_exponent();
    BigDecimal::new(digits, scale + decimals as i64)
}

/// Round half-up to a fixed number of decimal places.
pub fn round_to(value: &BigDecimal, places: i64) -> BigDecimal {
    value.with_scale_round(places, RoundingMode::HalfUp)
}

/// Render a decimal without exponent notation.
pub fn decimal_to_string(value: &BigDecimal) -> String {
    value.to_plain_string()
}

// ============================================
// Serde helpers
// ============================================

/// Serialize a `BigDecimal` as a plain decimal string and accept either a
/// string or a JSON number when deserializing.
pub mod decimal_string {
    use bigdecimal::BigDecimal;
    use serde::{de, Deserializer, Serializer};
    use std::fmt;

    use super::{decimal_from_f64, decimal_to_string, parse_decimal};

    pub fn serialize<S: Serializer>(value: &BigDecimal, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&decimal_to_string(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigDecimal, D::Error> {
        deserializer.deserialize_any(DecimalVisitor)
    }

    struct DecimalVisitor;

    impl<'de> de::Visitor<'de> for DecimalVisitor {
        type Value = BigDecimal;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a decimal number or decimal string")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<BigDecimal, E> {
            parse_decimal(v).ok_or_else(|| E::custom(format!("invalid decimal {v:?}")))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<BigDecimal, E> {
            Ok(BigDecimal::from(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<BigDecimal, E> {
            Ok(BigDecimal::from(v))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<BigDecimal, E> {
            decimal_from_f64(v).ok_or_else(|| E::custom(format!("invalid decimal {v}")))
        }
    }
}
