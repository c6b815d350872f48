//! Paper exchange: a connector over a virtual balance.
//!
//! Slippage and fees are applied arithmetically instead of submitting
//! transactions. Quotes are fee-adjusted but slippage-free, so a configured
//! slippage above the engine's tolerance makes fills revert exactly like an
//! on-chain guard would.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::ledger::Ledger;
use crate::models::{from_units, to_units, ConnectorRef, Outcome, COLLATERAL_DECIMALS};
use crate::trading::{
    ConfirmationOutcome, Connector, ConnectorError, ExecutionCost, Orchestrator,
    ReplicationConfig, ReplicationError, Submission, TokenKind, TradeOp,
};

/// Paper trading configuration.
#[derive(Debug, Clone)]
pub struct PaperConfig {
    /// Starting virtual balance in USDC
    pub initial_balance: Decimal,

    /// Simulated slippage (0.0 to 1.0)
    pub slippage: Decimal,

    /// Simulated fee rate (0.0 to 1.0)
    pub fee_rate: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            slippage: dec!(0.003),
            fee_rate: dec!(0.001),
        }
    }
}

#[derive(Debug, Clone)]
enum PendingFill {
    Filled { output: u64 },
    Reverted { reason: String },
}

#[derive(Debug, Default)]
struct PaperState {
    balance: u64,
    tokens: HashMap<(String, Outcome), u64>,
    pending: HashMap<String, PendingFill>,
    next_id: u64,
    total_fees: u64,
    fills: u32,
    reverts: u32,
}

/// Connector backed by a virtual balance.
pub struct PaperExchange {
    config: PaperConfig,
    initial_balance: u64,
    started_at: DateTime<Utc>,
    state: Mutex<PaperState>,
}

/// The replication engine driven by a [`PaperExchange`].
pub type Simulator = Orchestrator<PaperExchange>;

/// Build a simulator. Ledger entries have the same shape as on the live path.
pub fn simulator(
    config: ReplicationConfig,
    paper: PaperConfig,
    ledger: Ledger,
) -> Result<Simulator, ReplicationError> {
    Orchestrator::new(config, PaperExchange::new(paper), ledger)
}

fn apply_rate(units: u64, factor: Decimal) -> u64 {
    (Decimal::from(units) * factor)
        .trunc()
        .to_u64()
        .unwrap_or(0)
}

impl PaperExchange {
    pub fn new(config: PaperConfig) -> Self {
        let initial_balance = to_units(config.initial_balance, COLLATERAL_DECIMALS);
        Self {
            state: Mutex::new(PaperState {
                balance: initial_balance,
                ..Default::default()
            }),
            initial_balance,
            started_at: Utc::now(),
            config,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PaperState>, ConnectorError> {
        self.state
            .lock()
            .map_err(|_| ConnectorError::Fatal("paper exchange state poisoned".to_string()))
    }

    fn keep_after_fee(&self) -> Decimal {
        Decimal::ONE - self.config.fee_rate
    }

    fn keep_after_slippage(&self) -> Decimal {
        Decimal::ONE - self.config.slippage
    }

    /// Output at the quoted price, before slippage.
    fn quoted(&self, op: &TradeOp) -> u64 {
        match op {
            TradeOp::Buy { amount, .. } => apply_rate(*amount, self.keep_after_fee()),
            TradeOp::Sell { tokens, .. } => apply_rate(*tokens, self.keep_after_fee()),
            TradeOp::Redeem { .. } => self.filled(op),
        }
    }

    /// Output actually delivered.
    fn filled(&self, op: &TradeOp) -> u64 {
        match op {
            TradeOp::Buy { amount, .. } => {
                apply_rate(*amount, self.keep_after_slippage() * self.keep_after_fee())
            }
            TradeOp::Sell { tokens, .. } => {
                apply_rate(*tokens, self.keep_after_slippage() * self.keep_after_fee())
            }
            TradeOp::Redeem {
                outcome,
                invested,
                winning_outcome,
                ..
            } => {
                if outcome == winning_outcome {
                    apply_rate(*invested, self.keep_after_fee())
                } else {
                    0
                }
            }
        }
    }

    /// Snapshot of the virtual account.
    pub fn stats(&self) -> PaperStats {
        let (cash, holdings, total_fees, fills, reverts) = match self.state.lock() {
            Ok(state) => (
                state.balance,
                state.tokens.values().filter(|t| **t > 0).count(),
                state.total_fees,
                state.fills,
                state.reverts,
            ),
            Err(_) => (0, 0, 0, 0, 0),
        };

        PaperStats {
            initial_balance: from_units(self.initial_balance, COLLATERAL_DECIMALS),
            cash_available: from_units(cash, COLLATERAL_DECIMALS),
            open_holdings: holdings,
            fills,
            reverts,
            total_fees: from_units(total_fees, COLLATERAL_DECIMALS),
            running_since: self.started_at,
        }
    }
}

#[async_trait]
impl Connector for PaperExchange {
    async fn resolve_market(
        &self,
        market_id: &str,
        outcome: Outcome,
    ) -> Result<ConnectorRef, ConnectorError> {
        Ok(ConnectorRef {
            market_address: market_id.to_string(),
            collateral_token: "PAPER-USDC".to_string(),
            outcome_token: format!("{}:{}", market_id, outcome),
            decimals: COLLATERAL_DECIMALS,
        })
    }

    async fn get_balance(&self, venue: &ConnectorRef, token: TokenKind) -> Result<u64, ConnectorError> {
        let state = self.lock()?;
        Ok(match token {
            TokenKind::Collateral => state.balance,
            TokenKind::Outcome(outcome) => state
                .tokens
                .get(&(venue.market_address.clone(), outcome))
                .copied()
                .unwrap_or(0),
        })
    }

    async fn get_allowance(&self, _venue: &ConnectorRef, _token: TokenKind) -> Result<u64, ConnectorError> {
        Ok(u64::MAX)
    }

    async fn approve(
        &self,
        _venue: &ConnectorRef,
        _token: TokenKind,
        _amount: u64,
    ) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn quote(&self, op: &TradeOp) -> Result<u64, ConnectorError> {
        Ok(self.quoted(op))
    }

    async fn estimate_effort(&self, _op: &TradeOp) -> Result<ExecutionCost, ConnectorError> {
        Ok(ExecutionCost::default())
    }

    async fn submit(
        &self,
        op: &TradeOp,
        min_output: u64,
        _fee_ceiling: u64,
    ) -> Result<Submission, ConnectorError> {
        let output = self.filled(op);
        let mut state = self.lock()?;

        state.next_id += 1;
        let handle = format!("paper-{}", state.next_id);
        let market = op.venue().market_address.clone();
        let key = (market.clone(), op.outcome());

        if output < min_output {
            debug!(market = %market, output, min_output, "Paper fill below guard, reverting");
            state.reverts += 1;
            state.pending.insert(
                handle.clone(),
                PendingFill::Reverted {
                    reason: format!("output {} below minimum {}", output, min_output),
                },
            );
            return Ok(Submission {
                handle,
                cost: ExecutionCost::default(),
            });
        }

        match op {
            TradeOp::Buy { amount, .. } => {
                if *amount > state.balance {
                    return Err(ConnectorError::Fatal(format!(
                        "virtual balance {} below {}",
                        state.balance, amount
                    )));
                }
                state.balance -= amount;
                *state.tokens.entry(key).or_insert(0) += output;
                state.total_fees += apply_rate(*amount, self.config.fee_rate);
            }
            TradeOp::Sell { tokens, .. } | TradeOp::Redeem { tokens, .. } => {
                let held = state.tokens.get(&key).copied().unwrap_or(0);
                if *tokens > held {
                    return Err(ConnectorError::Fatal(format!(
                        "holding {} tokens, cannot sell {}",
                        held, tokens
                    )));
                }
                state.tokens.insert(key, held - tokens);
                state.balance += output;
                let gross = match op {
                    TradeOp::Redeem { invested, .. } if output > 0 => *invested,
                    _ => *tokens,
                };
                state.total_fees += apply_rate(gross, self.config.fee_rate);
            }
        }

        state.fills += 1;
        state
            .pending
            .insert(handle.clone(), PendingFill::Filled { output });

        Ok(Submission {
            handle,
            cost: ExecutionCost::default(),
        })
    }

    async fn await_confirmation(
        &self,
        handle: &str,
        _confirmations: u32,
    ) -> Result<ConfirmationOutcome, ConnectorError> {
        let state = self.lock()?;
        match state.pending.get(handle) {
            Some(PendingFill::Filled { output }) => Ok(ConfirmationOutcome::Confirmed {
                output_amount: *output,
            }),
            Some(PendingFill::Reverted { reason }) => Ok(ConfirmationOutcome::Reverted {
                reason: reason.clone(),
            }),
            None => Err(ConnectorError::Fatal(format!("unknown handle {}", handle))),
        }
    }

    async fn write_off(
        &self,
        venue: &ConnectorRef,
        outcome: Outcome,
        _tokens: u64,
    ) -> Result<(), ConnectorError> {
        let mut state = self.lock()?;
        state
            .tokens
            .remove(&(venue.market_address.clone(), outcome));
        Ok(())
    }
}

/// Paper trading statistics.
#[derive(Debug, Clone)]
pub struct PaperStats {
    pub initial_balance: Decimal,
    pub cash_available: Decimal,
    pub open_holdings: usize,
    pub fills: u32,
    pub reverts: u32,
    pub total_fees: Decimal,
    pub running_since: DateTime<Utc>,
}

impl std::fmt::Display for PaperStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n{:=^50}", " PAPER EXCHANGE ")?;
        writeln!(f, "Running since: {}", self.running_since.format("%Y-%m-%d %H:%M"))?;
        writeln!(f)?;
        writeln!(f, "Initial Balance:  ${:.2}", self.initial_balance)?;
        writeln!(f, "Cash Available:   ${:.2}", self.cash_available)?;
        writeln!(f, "Open Holdings:    {}", self.open_holdings)?;
        writeln!(f, "Fills:            {}", self.fills)?;
        writeln!(f, "Reverted:         {}", self.reverts)?;
        writeln!(f, "Total Fees:       ${:.2}", self.total_fees)?;
        writeln!(f, "{:=^50}", "")?;
        Ok(())
    }
}
