//! Conversions between decimal display amounts and integer minor units.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::{RailError, Result};

/// Satoshis per bitcoin.
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Converts a decimal amount into minor units, rounding up.
///
/// Rounding up means the merchant is never short-changed by a fraction of a
/// unit.
///
/// # Errors
///
/// Returns [`RailError::InvalidAmount`] for negative amounts or values that
/// do not fit in `u64` minor units.
pub fn to_minor_units(amount: Decimal, decimals: u32) -> Result<u64> {
    if amount.is_sign_negative() {
        return Err(RailError::InvalidAmount(amount.to_string()));
    }
    let scale = 10u64
        .checked_pow(decimals)
        .ok_or_else(|| RailError::InvalidAmount(format!("{decimals} decimals")))?;
    amount
        .checked_mul(Decimal::from(scale))
        .map(|scaled| scaled.ceil())
        .and_then(|scaled| scaled.to_u64())
        .ok_or_else(|| RailError::InvalidAmount(amount.to_string()))
}

/// Converts minor units back into a decimal amount with `decimals` places.
///
/// # Errors
///
/// Returns [`RailError::InvalidAmount`] when `decimals` exceeds the
/// precision [`Decimal`] can carry.
pub fn from_minor_units(units: u64, decimals: u32) -> Result<Decimal> {
    let mut amount = Decimal::from(units);
    amount
        .set_scale(decimals)
        .map_err(|e| RailError::InvalidAmount(e.to_string()))?;
    Ok(amount)
}

/// Parses an integer string of minor units as reported by token explorers.
///
/// # Errors
///
/// Returns [`RailError::InvalidAmount`] when the string is not a
/// non-negative integer that fits in `u64`.
pub fn parse_minor_units(raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| RailError::InvalidAmount(raw.to_owned()))
}

/// Validates a caller-facing USD amount.
///
/// # Errors
///
/// Returns [`RailError::InvalidAmount`] unless the amount is strictly positive.
pub fn ensure_positive(amount: Decimal) -> Result<Decimal> {
    if amount > Decimal::ZERO {
        Ok(amount)
    } else {
        Err(RailError::InvalidAmount(amount.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn rounds_up_to_minor_units() {
        assert_eq!(to_minor_units(Decimal::from(10), 6).unwrap(), 10_000_000);
        let fractional = Decimal::from_str("0.0000001").unwrap();
        assert_eq!(to_minor_units(fractional, 6).unwrap(), 1);
        assert!(to_minor_units(Decimal::from(-1), 6).is_err());
    }

    #[test]
    fn formats_minor_units() {
        assert_eq!(from_minor_units(9_950, 8).unwrap().to_string(), "0.00009950");
        assert_eq!(parse_minor_units(" 12500000 ").unwrap(), 12_500_000);
        assert!(parse_minor_units("1.5").is_err());
    }
}
