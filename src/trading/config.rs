//! Replication configuration.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::error::ReplicationError;
use super::retry::RetryPolicy;

/// Bounds and guards applied to every replicated trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Scale applied to the target's investment
    pub multiplier: Decimal,

    /// Minimum trade size in USDC
    pub min_trade_size: Decimal,

    /// Maximum trade size in USDC
    pub max_trade_size: Decimal,

    /// Relative balance growth that counts as an increase (0.1 = 10%)
    pub increase_threshold: Decimal,

    /// Slippage tolerance on the open leg, in basis points
    pub slippage_bps: u32,

    /// Haircut applied to the expected return on the close leg, in percent
    pub sell_haircut_pct: u32,

    /// Hard ceiling on price per unit of execution effort
    pub fee_ceiling: u64,

    /// Confirmations to wait for before a leg counts as done
    pub confirmations: u32,

    /// How long to wait for those confirmations (seconds)
    pub confirmation_timeout_secs: u64,

    /// Markets processed concurrently within one pass
    pub max_concurrent_markets: usize,

    /// Retry policy for connector reads
    pub retry: RetryPolicy,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            multiplier: dec!(1.0),
            min_trade_size: dec!(1.0),           // Min $1
            max_trade_size: dec!(50.0),          // Max $50
            increase_threshold: dec!(0.1),       // 10% growth
            slippage_bps: 100,                   // 1%
            sell_haircut_pct: 5,
            fee_ceiling: 100,
            confirmations: 1,
            confirmation_timeout_secs: 120,
            max_concurrent_markets: 4,
            retry: RetryPolicy::default(),
        }
    }
}

impl ReplicationConfig {
    /// Reject inconsistent bounds. Called once at startup.
    pub fn validate(&self) -> Result<(), ReplicationError> {
        if self.multiplier < Decimal::ZERO {
            return Err(ReplicationError::InvalidConfig(format!(
                "multiplier must not be negative, got {}",
                self.multiplier
            )));
        }
        if self.min_trade_size < Decimal::ZERO {
            return Err(ReplicationError::InvalidConfig(format!(
                "min trade size must not be negative, got {}",
                self.min_trade_size
            )));
        }
        if self.min_trade_size > self.max_trade_size {
            return Err(ReplicationError::InvalidConfig(format!(
                "min trade size {} exceeds max trade size {}",
                self.min_trade_size, self.max_trade_size
            )));
        }
        if self.increase_threshold < Decimal::ZERO {
            return Err(ReplicationError::InvalidConfig(
                "increase threshold must not be negative".to_string(),
            ));
        }
        if self.slippage_bps > 10_000 {
            return Err(ReplicationError::InvalidConfig(format!(
                "slippage of {} bps exceeds 100%",
                self.slippage_bps
            )));
        }
        if self.sell_haircut_pct > 100 {
            return Err(ReplicationError::InvalidConfig(format!(
                "sell haircut of {}% exceeds 100%",
                self.sell_haircut_pct
            )));
        }
        if self.max_concurrent_markets == 0 {
            return Err(ReplicationError::InvalidConfig(
                "max concurrent markets must be at least 1".to_string(),
            ));
        }
        if self.confirmation_timeout_secs == 0 {
            return Err(ReplicationError::InvalidConfig(
                "confirmation timeout must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ReplicationError::InvalidConfig(
                "retry policy needs at least one attempt".to_string(),
            ));
        }
        Ok(())
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ReplicationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let config = ReplicationConfig {
            min_trade_size: dec!(100),
            max_trade_size: dec!(10),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ReplicationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_negative_multiplier_rejected() {
        let config = ReplicationConfig {
            multiplier: dec!(-1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_guard_percentages_bounded() {
        let config = ReplicationConfig {
            slippage_bps: 10_001,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ReplicationConfig {
            sell_haircut_pct: 101,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
