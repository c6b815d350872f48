//! Conversion between decimal collateral amounts and integer base units.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// USDC and Polymarket outcome tokens both use 6 decimals.
pub const COLLATERAL_DECIMALS: u32 = 6;

/// Convert a decimal amount into base units, truncating dust.
///
/// Negative amounts map to zero.
pub fn to_units(amount: Decimal, decimals: u32) -> u64 {
    if amount <= Decimal::ZERO {
        return 0;
    }
    (amount * Decimal::from(10u64.pow(decimals)))
        .trunc()
        .to_u64()
        .unwrap_or(u64::MAX)
}

/// Convert base units back into an exact decimal amount.
pub fn from_units(units: u64, decimals: u32) -> Decimal {
    Decimal::from_i128_with_scale(units as i128, decimals)
}

/// Multiply `units` by `numerator / denominator` in integer arithmetic, rounding down.
pub fn scale_down(units: u64, numerator: u64, denominator: u64) -> u64 {
    if denominator == 0 {
        return 0;
    }
    ((units as u128 * numerator as u128) / denominator as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_units() {
        assert_eq!(to_units(dec!(100.5), COLLATERAL_DECIMALS), 100_500_000);
        assert_eq!(to_units(dec!(0.0000009), COLLATERAL_DECIMALS), 0);
        assert_eq!(to_units(dec!(-3), COLLATERAL_DECIMALS), 0);
    }

    #[test]
    fn test_from_units_is_exact() {
        assert_eq!(from_units(10_000_000, COLLATERAL_DECIMALS), dec!(10));
        assert_eq!(from_units(1, COLLATERAL_DECIMALS), dec!(0.000001));
    }

    #[test]
    fn test_scale_down() {
        assert_eq!(scale_down(10_000_000, 9_950, 10_000), 9_950_000);
        assert_eq!(scale_down(7, 1, 2), 3);
        assert_eq!(scale_down(u64::MAX, 1, 1), u64::MAX);
        assert_eq!(scale_down(5, 1, 0), 0);
    }
}
