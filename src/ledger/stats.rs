//! Statistics derived from ledger entries. Never stored independently of them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::entry::{LedgerEntry, TradeSide};
use crate::models::{from_units, COLLATERAL_DECIMALS};

/// Aggregates over the whole ledger. Amounts are collateral base units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerStatistics {
    pub total_entries: u32,
    pub buys: u32,
    pub sells: u32,
    pub open_positions: u32,
    pub closed_positions: u32,
    pub orphaned_sells: u32,

    /// Closed positions with positive realized P&L
    pub winning: u32,

    /// Closed positions with zero or negative realized P&L
    pub losing: u32,

    /// Sum of all BUY amounts
    pub total_invested: u64,

    /// Sum of all SELL amounts
    pub total_returned: u64,

    /// `total_returned - total_invested`
    pub total_pnl: i64,

    /// Sum of realized P&L over closed BUYs
    pub realized_pnl: i64,

    /// Collateral still tied up in open BUYs
    pub open_exposure: u64,

    pub total_fees: u64,

    /// Largest peak-to-trough drop of cumulative realized P&L
    pub max_drawdown: u64,

    /// Winning / closed (0.0 to 1.0)
    pub win_rate: f64,
}

impl LedgerStatistics {
    /// Recompute everything from scratch.
    pub fn calculate(entries: &[LedgerEntry]) -> Self {
        let mut stats = Self {
            total_entries: entries.len() as u32,
            ..Default::default()
        };

        for entry in entries {
            stats.total_fees = stats.total_fees.saturating_add(entry.fee_cost);

            match entry.side {
                TradeSide::Buy => {
                    stats.buys += 1;
                    stats.total_invested = stats.total_invested.saturating_add(entry.amount);

                    if entry.is_open() {
                        stats.open_positions += 1;
                        stats.open_exposure = stats.open_exposure.saturating_add(entry.amount);
                    } else if entry.is_closed() {
                        stats.closed_positions += 1;
                        let pnl = entry.realized_pnl.unwrap_or(0);
                        stats.realized_pnl = stats.realized_pnl.saturating_add(pnl);
                        if pnl > 0 {
                            stats.winning += 1;
                        } else {
                            stats.losing += 1;
                        }
                    }
                }
                TradeSide::Sell => {
                    stats.sells += 1;
                    stats.total_returned = stats.total_returned.saturating_add(entry.amount);
                    if entry.orphaned {
                        stats.orphaned_sells += 1;
                    }
                }
            }
        }

        stats.total_pnl = signed_diff(stats.total_returned, stats.total_invested);
        stats.max_drawdown = Self::max_drawdown(entries);

        if stats.closed_positions > 0 {
            stats.win_rate = stats.winning as f64 / stats.closed_positions as f64;
        }

        stats
    }

    /// Drawdown of the realized P&L curve, in close order.
    fn max_drawdown(entries: &[LedgerEntry]) -> u64 {
        let mut closes: Vec<&LedgerEntry> = entries.iter().filter(|e| e.is_closed()).collect();
        closes.sort_by_key(|e| (e.closed_at, e.trade_id));

        let mut equity: i128 = 0;
        let mut peak: i128 = 0;
        let mut max_dd: i128 = 0;

        for entry in closes {
            equity += entry.realized_pnl.unwrap_or(0) as i128;
            peak = peak.max(equity);
            max_dd = max_dd.max(peak - equity);
        }

        u64::try_from(max_dd).unwrap_or(u64::MAX)
    }
}

/// `a - b` as a signed amount, saturating at the i64 range.
pub fn signed_diff(a: u64, b: u64) -> i64 {
    let diff = a as i128 - b as i128;
    i64::try_from(diff).unwrap_or(if diff < 0 { i64::MIN } else { i64::MAX })
}

fn usdc(units: u64) -> rust_decimal::Decimal {
    from_units(units, COLLATERAL_DECIMALS)
}

fn usdc_signed(units: i64) -> rust_decimal::Decimal {
    let magnitude = usdc(units.unsigned_abs());
    if units < 0 {
        -magnitude
    } else {
        magnitude
    }
}

impl fmt::Display for LedgerStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Ledger Statistics")?;
        writeln!(f, "=================")?;
        writeln!(
            f,
            "Entries:        {} ({} buys, {} sells, {} orphaned)",
            self.total_entries, self.buys, self.sells, self.orphaned_sells
        )?;
        writeln!(
            f,
            "Positions:      {} open, {} closed",
            self.open_positions, self.closed_positions
        )?;
        writeln!(
            f,
            "Win Rate:       {:.1}% ({} won / {} lost)",
            self.win_rate * 100.0,
            self.winning,
            self.losing
        )?;
        writeln!(f, "Invested:       ${:.2}", usdc(self.total_invested))?;
        writeln!(f, "Returned:       ${:.2}", usdc(self.total_returned))?;
        writeln!(f, "Open Exposure:  ${:.2}", usdc(self.open_exposure))?;
        writeln!(f, "Realized P&L:   ${:.2}", usdc_signed(self.realized_pnl))?;
        writeln!(f, "Total P&L:      ${:.2}", usdc_signed(self.total_pnl))?;
        writeln!(f, "Max Drawdown:   ${:.2}", usdc(self.max_drawdown))?;
        write!(f, "Fees:           {}", self.total_fees)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::entry::TradeStatus;
    use crate::models::Outcome;
    use chrono::{Duration, Utc};

    fn buy(id: u64, amount: u64, pnl: Option<i64>) -> LedgerEntry {
        let now = Utc::now();
        LedgerEntry {
            trade_id: id,
            side: TradeSide::Buy,
            market_id: format!("m{}", id),
            outcome: Outcome::SideA,
            amount,
            token_amount: amount * 2,
            fee_cost: 1,
            tx_ref: format!("0x{}", id),
            recorded_at: now,
            status: Some(if pnl.is_some() {
                TradeStatus::Closed
            } else {
                TradeStatus::Open
            }),
            closed_at: pnl.map(|_| now + Duration::seconds(id as i64)),
            realized_pnl: pnl,
            close_ref: None,
            linked_buy: None,
            orphaned: false,
            settlement: None,
        }
    }

    fn sell(id: u64, amount: u64, linked: Option<u64>) -> LedgerEntry {
        LedgerEntry {
            side: TradeSide::Sell,
            status: None,
            closed_at: None,
            realized_pnl: None,
            linked_buy: linked,
            orphaned: linked.is_none(),
            amount,
            ..buy(id, amount, None)
        }
    }

    #[test]
    fn test_empty_ledger() {
        let stats = LedgerStatistics::calculate(&[]);
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.total_pnl, 0);
    }

    #[test]
    fn test_pnl_identity() {
        let entries = vec![
            buy(1, 10_000_000, Some(2_000_000)),
            sell(2, 12_000_000, Some(1)),
            buy(3, 5_000_000, Some(-5_000_000)),
            sell(4, 0, Some(3)),
            buy(5, 7_000_000, None),
            sell(6, 1_000_000, None),
        ];
        let stats = LedgerStatistics::calculate(&entries);

        assert_eq!(stats.total_invested, 22_000_000);
        assert_eq!(stats.total_returned, 13_000_000);
        assert_eq!(
            stats.total_pnl,
            stats.total_returned as i64 - stats.total_invested as i64
        );
        assert_eq!(stats.realized_pnl, -3_000_000);
        assert_eq!(stats.open_positions, 1);
        assert_eq!(stats.open_exposure, 7_000_000);
        assert_eq!(stats.closed_positions, 2);
        assert_eq!(stats.orphaned_sells, 1);
        assert_eq!(stats.winning, 1);
        assert_eq!(stats.losing, 1);
        assert_eq!(stats.win_rate, 0.5);
        assert_eq!(stats.total_fees, 6);
    }

    #[test]
    fn test_max_drawdown() {
        let entries = vec![
            buy(1, 1, Some(5)),
            buy(2, 1, Some(-8)),
            buy(3, 1, Some(2)),
            buy(4, 1, Some(-1)),
        ];
        // equity: 5, -3, -1, -2; peak 5, trough -3
        assert_eq!(LedgerStatistics::calculate(&entries).max_drawdown, 8);
    }

    #[test]
    fn test_signed_diff() {
        assert_eq!(signed_diff(5, 8), -3);
        assert_eq!(signed_diff(u64::MAX, 0), i64::MAX);
    }
}
