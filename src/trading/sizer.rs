//! Trade sizing: scale the target's investment and clamp it to configured bounds.

use rust_decimal::Decimal;

use super::config::ReplicationConfig;
use super::error::ReplicationError;

/// `clamp(target * multiplier, min, max)`.
///
/// A non-positive product returns zero, which the caller treats as a skip.
pub fn size(
    target: Decimal,
    multiplier: Decimal,
    min: Decimal,
    max: Decimal,
) -> Result<Decimal, ReplicationError> {
    check_bounds(multiplier, min, max)?;

    let raw = target * multiplier;
    if raw <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }

    Ok(raw.max(min).min(max))
}

fn check_bounds(multiplier: Decimal, min: Decimal, max: Decimal) -> Result<(), ReplicationError> {
    if min > max {
        return Err(ReplicationError::InvalidConfig(format!(
            "min {} is greater than max {}",
            min, max
        )));
    }
    if min < Decimal::ZERO {
        return Err(ReplicationError::InvalidConfig(format!(
            "min {} is negative",
            min
        )));
    }
    if multiplier < Decimal::ZERO {
        return Err(ReplicationError::InvalidConfig(format!(
            "multiplier {} is negative",
            multiplier
        )));
    }
    Ok(())
}

/// Sizer bound to a validated multiplier and range.
#[derive(Debug, Clone, Copy)]
pub struct TradeSizer {
    multiplier: Decimal,
    min: Decimal,
    max: Decimal,
}

impl TradeSizer {
    pub fn new(multiplier: Decimal, min: Decimal, max: Decimal) -> Result<Self, ReplicationError> {
        check_bounds(multiplier, min, max)?;
        Ok(Self { multiplier, min, max })
    }

    pub fn from_config(config: &ReplicationConfig) -> Result<Self, ReplicationError> {
        Self::new(config.multiplier, config.min_trade_size, config.max_trade_size)
    }

    /// Local trade size in USDC for a target investment; zero means skip.
    pub fn size(&self, target: Decimal) -> Decimal {
        let raw = target * self.multiplier;
        if raw <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        raw.max(self.min).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_within_bounds_passes_through() {
        assert_eq!(size(dec!(10), dec!(1), dec!(1), dec!(50)).unwrap(), dec!(10));
    }

    #[test]
    fn test_clamped_to_max() {
        // 200 * 0.5 = 100, clamped to 50
        assert_eq!(size(dec!(200), dec!(0.5), dec!(5), dec!(50)).unwrap(), dec!(50));
    }

    #[test]
    fn test_raised_to_min() {
        assert_eq!(size(dec!(2), dec!(0.5), dec!(5), dec!(50)).unwrap(), dec!(5));
    }

    #[test]
    fn test_non_positive_is_skip() {
        assert_eq!(size(dec!(0), dec!(1), dec!(5), dec!(50)).unwrap(), Decimal::ZERO);
        assert_eq!(size(dec!(-3), dec!(1), dec!(5), dec!(50)).unwrap(), Decimal::ZERO);
        assert_eq!(size(dec!(10), dec!(0), dec!(5), dec!(50)).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_invalid_bounds() {
        assert!(matches!(
            size(dec!(10), dec!(1), dec!(50), dec!(5)),
            Err(ReplicationError::InvalidConfig(_))
        ));
        assert!(matches!(
            size(dec!(10), dec!(1), dec!(-1), dec!(5)),
            Err(ReplicationError::InvalidConfig(_))
        ));
        assert!(matches!(
            size(dec!(10), dec!(-1), dec!(1), dec!(5)),
            Err(ReplicationError::InvalidConfig(_))
        ));
        assert!(TradeSizer::new(dec!(1), dec!(10), dec!(1)).is_err());
    }

    #[test]
    fn test_monotonic_in_target() {
        let sizer = TradeSizer::new(dec!(0.75), dec!(5), dec!(50)).unwrap();
        let mut last = Decimal::ZERO;
        for i in 0..200 {
            let target = Decimal::from(i) * dec!(0.5);
            let sized = sizer.size(target);
            assert!(sized >= last, "size({}) = {} < {}", target, sized, last);
            if sized > Decimal::ZERO {
                assert!(sized >= dec!(5) && sized <= dec!(50));
            }
            last = sized;
        }
    }

    #[test]
    fn test_sizer_matches_free_function() {
        let sizer = TradeSizer::new(dec!(0.5), dec!(5), dec!(50)).unwrap();
        for target in [dec!(0), dec!(3), dec!(40), dec!(200)] {
            assert_eq!(
                sizer.size(target),
                size(target, dec!(0.5), dec!(5), dec!(50)).unwrap()
            );
        }
    }
}
