//! Validation helpers for reference prices and on-chain amounts.
//!
//! Prices come from an external provider as floating point numbers. Anything
//! that is not a finite, non-negative value must never reach a snapshot.

use bigdecimal::BigDecimal;
use num_traits::Signed;

use crate::error::AggregateError;

use super::conversion::decimal_from_f64;

// ============================================
// Price Validation
// ============================================

/// Validate a single reference price.
/// Returns Some(price) if finite and non-negative, None otherwise.
#[inline]
pub fn validate_reference_price(price: f64) -> Option<f64> {
    if price.is_finite() && price >= 0.0 {
        Some(price)
    } else {
        None
    }
}

/// Convert a reference price into a decimal, failing with `InvalidNumber` when
/// the value cannot be represented.
pub fn price_to_decimal(
    price: f64,
    field: &'static str,
    context: &str,
) -> Result<BigDecimal, AggregateError> {
    validate_reference_price(price)
        .and_then(decimal_from_f64)
        .ok_or_else(|| AggregateError::InvalidNumber {
            field,
            context: context.to_string(),
        })
}

// ============================================
// Amount Validation
// ============================================

/// Raw on-chain amounts are unsigned integers in the asset's smallest unit.
#[inline]
pub fn is_raw_amount(value: &BigDecimal) -> bool {
    !value.is_negative() && value.is_integer()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::parse_decimal;

    #[test]
    fn test_validate_reference_price() {
        assert_eq!(validate_reference_price(30000.0), Some(30000.0));
        assert_eq!(validate_reference_price(0.0), Some(0.0));
        assert_eq!(validate_reference_price(-1.0), None);
        assert_eq!(validate_reference_price(f64::NAN), None);
        assert_eq!(validate_reference_price(f64::INFINITY), None);
    }

    #[test]
    fn test_price_to_decimal_reports_field() {
        let err = price_to_decimal(f64::NAN, "price_in_usd", "BTC").unwrap_err();
        match err {
            AggregateError::InvalidNumber { field, context } => {
                assert_eq!(field, "price_in_usd");
                assert_eq!(context, "BTC");
            }
        }
    }

    #[test]
    fn test_is_raw_amount() {
        assert!(is_raw_amount(&parse_decimal("100000000").unwrap()));
        assert!(!is_raw_amount(&parse_decimal("1.5").unwrap()));
        assert!(!is_raw_amount(&parse_decimal("-5").unwrap()));
    }
}
