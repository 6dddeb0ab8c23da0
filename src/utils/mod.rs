//! Utility functions for the bridgetrack indexer.
//!
//! This module is organized into focused submodules:
//!
//! - [`validation`] - Reference price and amount validation
//! - [`conversion`] - Decimal conversions, bucket alignment and serde helpers

mod conversion;
mod validation;

// ============================================
// Re-exports
// ============================================

// Conversion utilities
pub use conversion::{
    bucket_timestamp, decimal_from_f64, decimal_string, decimal_to_string, parse_decimal,
    round_to, shift_decimals, BUCKET_LENGTH,
};

// Validation utilities
pub use validation::{is_raw_amount, price_to_decimal, validate_reference_price};
