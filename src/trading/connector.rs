//! Interfaces to the outside world: the position feed and the exchange connector.
//!
//! The orchestrator drives every leg through [`Connector`]; the live CLOB client
//! and the paper exchange both implement it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::{ConnectorError, ReplicationError};
use crate::models::{ConnectorRef, Outcome, PositionSnapshot};

/// Source of the target wallet's current holdings.
#[async_trait]
pub trait PositionFeed: Send + Sync {
    /// One snapshot per market. Fails with `FeedUnavailable`.
    async fn fetch_positions(&self, address: &str)
        -> Result<Vec<PositionSnapshot>, ReplicationError>;
}

/// Which token a balance or allowance refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Collateral,
    Outcome(Outcome),
}

/// A trade the connector is asked to execute. Amounts are base units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeOp {
    /// Spend `amount` collateral on `outcome` tokens
    Buy {
        venue: ConnectorRef,
        outcome: Outcome,
        amount: u64,
    },

    /// Sell `tokens` outcome tokens back for collateral
    Sell {
        venue: ConnectorRef,
        outcome: Outcome,
        tokens: u64,
    },

    /// Redeem tokens of a resolved market
    Redeem {
        venue: ConnectorRef,
        outcome: Outcome,
        tokens: u64,
        invested: u64,
        winning_outcome: Outcome,
    },
}

impl TradeOp {
    pub fn venue(&self) -> &ConnectorRef {
        match self {
            TradeOp::Buy { venue, .. }
            | TradeOp::Sell { venue, .. }
            | TradeOp::Redeem { venue, .. } => venue,
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            TradeOp::Buy { outcome, .. }
            | TradeOp::Sell { outcome, .. }
            | TradeOp::Redeem { outcome, .. } => *outcome,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TradeOp::Buy { .. } => "buy",
            TradeOp::Sell { .. } => "sell",
            TradeOp::Redeem { .. } => "redeem",
        }
    }
}

/// Execution effort for an op and the current price per unit of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionCost {
    pub units: u64,
    pub unit_price: u64,
}

impl ExecutionCost {
    pub fn total(&self) -> u64 {
        self.units.saturating_mul(self.unit_price)
    }
}

/// Receipt of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Transaction hash or order id
    pub handle: String,
    pub cost: ExecutionCost,
}

/// How a submitted trade ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Confirmed with the amount actually received
    Confirmed { output_amount: u64 },
    Reverted { reason: String },
    TimedOut,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Look up the venue details needed to trade `outcome` in a market.
    async fn resolve_market(
        &self,
        market_id: &str,
        outcome: Outcome,
    ) -> Result<ConnectorRef, ConnectorError>;

    async fn get_balance(&self, venue: &ConnectorRef, token: TokenKind)
        -> Result<u64, ConnectorError>;

    async fn get_allowance(
        &self,
        venue: &ConnectorRef,
        token: TokenKind,
    ) -> Result<u64, ConnectorError>;

    async fn approve(
        &self,
        venue: &ConnectorRef,
        token: TokenKind,
        amount: u64,
    ) -> Result<(), ConnectorError>;

    /// Expected output of `op` at current prices, before any guard.
    async fn quote(&self, op: &TradeOp) -> Result<u64, ConnectorError>;

    async fn estimate_effort(&self, op: &TradeOp) -> Result<ExecutionCost, ConnectorError>;

    /// Submit `op`. The venue must refuse to fill below `min_output` or above
    /// `fee_ceiling` per unit of effort.
    async fn submit(
        &self,
        op: &TradeOp,
        min_output: u64,
        fee_ceiling: u64,
    ) -> Result<Submission, ConnectorError>;

    async fn await_confirmation(
        &self,
        handle: &str,
        confirmations: u32,
    ) -> Result<ConfirmationOutcome, ConnectorError>;

    /// Whether `TradeOp::Redeem` can be submitted here. When it cannot, a
    /// winning position is booked at its settlement value and left for
    /// manual redemption.
    fn supports_redeem(&self) -> bool {
        true
    }

    /// Forget `tokens` of a side that resolved worthless. Nothing is submitted.
    async fn write_off(
        &self,
        _venue: &ConnectorRef,
        _outcome: Outcome,
        _tokens: u64,
    ) -> Result<(), ConnectorError> {
        Ok(())
    }
}
