//! Snapshots of the target wallet's holdings, one per market per poll.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Outcome;

/// Holdings of the target wallet in one binary market, as captured by a single poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Stable market identifier (condition id)
    pub market_id: String,

    /// Outcome token balance per side, indexed by [`Outcome::index`], in base units
    pub balances: [u64; 2],

    /// Estimated cost basis per side in collateral (USDC), indexed like `balances`
    pub investments: [Decimal; 2],

    /// Whether the market has resolved
    #[serde(default)]
    pub resolved: bool,

    /// Winning side, only set once resolved
    #[serde(default)]
    pub winning_outcome: Option<Outcome>,
}

impl PositionSnapshot {
    /// Snapshot holding `balance` of a single side.
    pub fn holding(
        market_id: impl Into<String>,
        outcome: Outcome,
        balance: u64,
        target_investment: Decimal,
    ) -> Self {
        let mut balances = [0u64; 2];
        let mut investments = [Decimal::ZERO; 2];
        balances[outcome.index()] = balance;
        investments[outcome.index()] = target_investment;
        Self {
            market_id: market_id.into(),
            balances,
            investments,
            resolved: false,
            winning_outcome: None,
        }
    }

    /// Snapshot of a market where the target holds nothing.
    pub fn empty(market_id: impl Into<String>) -> Self {
        Self::holding(market_id, Outcome::SideA, 0, Decimal::ZERO)
    }

    /// Mark the snapshot as resolved in favour of `winner`.
    pub fn resolved_to(mut self, winner: Outcome) -> Self {
        self.resolved = true;
        self.winning_outcome = Some(winner);
        self
    }

    pub fn balance_of(&self, outcome: Outcome) -> u64 {
        self.balances[outcome.index()]
    }

    /// What the target paid for its `outcome` tokens.
    pub fn investment_of(&self, outcome: Outcome) -> Decimal {
        self.investments[outcome.index()]
    }

    /// Both sides hold the same non-zero balance.
    pub fn is_tied(&self) -> bool {
        let a = self.balance_of(Outcome::SideA);
        a > 0 && a == self.balance_of(Outcome::SideB)
    }

    /// The side the target is holding.
    ///
    /// The larger balance wins. Both zero means no position. An exact non-zero
    /// tie keeps `previous` when known, otherwise falls back to `SideA`.
    pub fn held_outcome(&self, previous: Option<Outcome>) -> Option<Outcome> {
        let a = self.balance_of(Outcome::SideA);
        let b = self.balance_of(Outcome::SideB);

        match a.cmp(&b) {
            _ if a == 0 && b == 0 => None,
            std::cmp::Ordering::Greater => Some(Outcome::SideA),
            std::cmp::Ordering::Less => Some(Outcome::SideB),
            std::cmp::Ordering::Equal => Some(previous.unwrap_or(Outcome::SideA)),
        }
    }
}

/// What the engine last observed for a market; the `lastSeen` map value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenPosition {
    pub outcome: Outcome,
    pub balance: u64,
    #[serde(default)]
    pub resolved: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_held_outcome_prefers_larger_balance() {
        let mut snap = PositionSnapshot::holding("m", Outcome::SideA, 5, dec!(1));
        snap.balances[Outcome::SideB.index()] = 9;
        assert_eq!(snap.held_outcome(None), Some(Outcome::SideB));
        assert_eq!(snap.held_outcome(Some(Outcome::SideA)), Some(Outcome::SideB));
    }

    #[test]
    fn test_held_outcome_empty() {
        assert_eq!(PositionSnapshot::empty("m").held_outcome(Some(Outcome::SideB)), None);
    }

    #[test]
    fn test_equal_balances_tie_break() {
        let snap = PositionSnapshot {
            market_id: "m".to_string(),
            balances: [7, 7],
            investments: [dec!(3), dec!(4)],
            resolved: false,
            winning_outcome: None,
        };
        assert!(snap.is_tied());
        assert_eq!(snap.held_outcome(None), Some(Outcome::SideA));
        assert_eq!(snap.held_outcome(Some(Outcome::SideB)), Some(Outcome::SideB));
        assert_eq!(snap.investment_of(Outcome::SideB), dec!(4));
    }

    #[test]
    fn test_empty_is_not_tied() {
        assert!(!PositionSnapshot::empty("m").is_tied());
        assert!(!PositionSnapshot::holding("m", Outcome::SideB, 3, dec!(1)).is_tied());
    }
}
