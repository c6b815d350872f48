//! Our replicated holdings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{from_units, Outcome};

/// Everything a connector needs to trade a market again later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorRef {
    /// Venue contract the orders settle against
    pub market_address: String,

    /// Collateral token address (USDC)
    pub collateral_token: String,

    /// Outcome token id of the side we hold
    pub outcome_token: String,

    /// Decimals of the collateral token
    pub decimals: u32,
}

/// A position we hold because the target holds it.
///
/// At most one exists per market at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalPosition {
    /// Market condition ID
    pub market_id: String,

    /// Side we bought
    pub outcome: Outcome,

    /// Collateral spent, in base units
    pub invested_amount: u64,

    /// Outcome tokens received, in base units
    pub token_amount: u64,

    /// Handle for closing the position later
    pub connector_ref: ConnectorRef,

    /// BUY entry in the ledger
    pub trade_id: u64,

    /// When the open leg confirmed
    pub opened_at: DateTime<Utc>,
}

impl LocalPosition {
    /// Invested collateral as a decimal amount.
    pub fn invested(&self) -> Decimal {
        from_units(self.invested_amount, self.connector_ref.decimals)
    }

    /// Effective entry price per outcome token.
    pub fn entry_price(&self) -> Decimal {
        if self.token_amount == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.invested_amount) / Decimal::from(self.token_amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_entry_price() {
        let pos = LocalPosition {
            market_id: "0xmarket".to_string(),
            outcome: Outcome::SideA,
            invested_amount: 10_000_000,
            token_amount: 20_000_000,
            connector_ref: ConnectorRef {
                market_address: "0xexchange".to_string(),
                collateral_token: "0xusdc".to_string(),
                outcome_token: "123".to_string(),
                decimals: 6,
            },
            trade_id: 1,
            opened_at: Utc::now(),
        };

        assert_eq!(pos.invested(), dec!(10));
        assert_eq!(pos.entry_price(), dec!(0.5));
    }
}
