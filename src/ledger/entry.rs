//! Ledger entries and the records used to append them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

/// Lifecycle of a BUY entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Open,
    Closed,
}

/// One executed action. Append-only; a BUY is updated exactly once when closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub trade_id: u64,
    pub side: TradeSide,
    pub market_id: String,
    pub outcome: Outcome,

    /// Collateral invested (BUY) or returned (SELL), in base units
    pub amount: u64,

    /// Outcome tokens received (BUY) or given up (SELL)
    pub token_amount: u64,

    /// Execution cost paid for the transaction
    #[serde(default)]
    pub fee_cost: u64,

    /// Transaction hash or order id; empty when nothing was submitted
    #[serde(default)]
    pub tx_ref: String,

    pub recorded_at: DateTime<Utc>,

    // BUY only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TradeStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<i64>,
    /// SELL entry that closed this BUY
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_ref: Option<u64>,

    // SELL only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_buy: Option<u64>,
    #[serde(default)]
    pub orphaned: bool,
    /// Winning side when the SELL settles a resolved market
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement: Option<Outcome>,
}

impl LedgerEntry {
    pub fn is_buy(&self) -> bool {
        self.side == TradeSide::Buy
    }

    pub fn is_open(&self) -> bool {
        self.is_buy() && self.status == Some(TradeStatus::Open)
    }

    pub fn is_closed(&self) -> bool {
        self.is_buy() && self.status == Some(TradeStatus::Closed)
    }
}

/// A confirmed open leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyRecord {
    pub market_id: String,
    pub outcome: Outcome,
    pub amount: u64,
    pub token_amount: u64,
    pub fee_cost: u64,
    pub tx_ref: String,
}

/// A confirmed close leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellRecord {
    pub market_id: String,
    pub outcome: Outcome,
    /// Collateral returned
    pub amount: u64,
    pub token_amount: u64,
    pub fee_cost: u64,
    pub tx_ref: String,
    /// BUY this sell closes; looked up by market and outcome when absent
    pub linked_buy: Option<u64>,
    pub settlement: Option<Outcome>,
}

/// Closure details written once onto a BUY entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeClosure {
    pub closed_at: DateTime<Utc>,
    pub realized_pnl: i64,
    pub close_ref: Option<u64>,
}
