//! Scripted connector and feed used by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::connector::{
    ConfirmationOutcome, Connector, ExecutionCost, PositionFeed, Submission, TokenKind, TradeOp,
};
use super::error::{ConnectorError, ReplicationError};
use crate::models::{ConnectorRef, Outcome, PositionSnapshot, COLLATERAL_DECIMALS};

#[derive(Default)]
struct MockState {
    collateral: u64,
    allowances: HashMap<(String, TokenKind), u64>,
    approvals: u32,
    submits: Vec<(TradeOp, u64, u64)>,
    log: Vec<String>,
    pending: HashMap<String, (String, u64)>,
    next_handle: u64,

    failing_markets: HashSet<String>,
    reverting_markets: HashSet<String>,
    stalling_markets: HashSet<String>,
    failing_submits: HashSet<String>,
    transient_reads: u32,
    unit_price: u64,
    redeem_unsupported: bool,
    write_offs: Vec<(String, Outcome, u64)>,
}

/// Connector with a fixed price of 0.5 per outcome token and scripted failures.
///
/// The market id doubles as the venue address so every op can be traced
/// back to its market.
#[derive(Default)]
pub struct MockConnector {
    state: Mutex<MockState>,
}

impl MockConnector {
    pub fn new(collateral: u64) -> Self {
        let connector = Self::default();
        connector.lock().collateral = collateral;
        connector
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Market lookups for `market` fail fatally.
    pub fn fail_market(&self, market: &str) {
        self.lock().failing_markets.insert(market.to_string());
    }

    pub fn heal_market(&self, market: &str) {
        self.lock().failing_markets.remove(market);
    }

    pub fn revert_market(&self, market: &str) {
        self.lock().reverting_markets.insert(market.to_string());
    }

    /// Confirmations for `market` never arrive.
    pub fn stall_market(&self, market: &str) {
        self.lock().stalling_markets.insert(market.to_string());
    }

    pub fn reject_submits(&self, market: &str) {
        self.lock().failing_submits.insert(market.to_string());
    }

    /// The next `count` balance reads fail transiently.
    pub fn fail_balance_reads(&self, count: u32) {
        self.lock().transient_reads = count;
    }

    /// Behave like a venue that cannot redeem resolved markets.
    pub fn disable_redeem(&self) {
        self.lock().redeem_unsupported = true;
    }

    /// `(market, outcome, tokens)` for every write-off, in order.
    pub fn write_offs(&self) -> Vec<(String, Outcome, u64)> {
        self.lock().write_offs.clone()
    }

    pub fn set_unit_price(&self, price: u64) {
        self.lock().unit_price = price;
    }

    pub fn collateral(&self) -> u64 {
        self.lock().collateral
    }

    pub fn approvals(&self) -> u32 {
        self.lock().approvals
    }

    pub fn submits(&self) -> Vec<(TradeOp, u64, u64)> {
        self.lock().submits.clone()
    }

    /// `"<op> <market>"` for every submission, in order.
    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    fn expected_output(op: &TradeOp) -> u64 {
        match op {
            TradeOp::Buy { amount, .. } => amount * 2,
            TradeOp::Sell { tokens, .. } => tokens / 2,
            TradeOp::Redeem {
                outcome,
                tokens,
                winning_outcome,
                ..
            } => {
                if outcome == winning_outcome {
                    *tokens
                } else {
                    0
                }
            }
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn resolve_market(
        &self,
        market_id: &str,
        outcome: Outcome,
    ) -> Result<ConnectorRef, ConnectorError> {
        if self.lock().failing_markets.contains(market_id) {
            return Err(ConnectorError::Fatal(format!("unknown market {}", market_id)));
        }
        Ok(ConnectorRef {
            market_address: market_id.to_string(),
            collateral_token: "0xusdc".to_string(),
            outcome_token: format!("{}:{}", market_id, outcome),
            decimals: COLLATERAL_DECIMALS,
        })
    }

    async fn get_balance(
        &self,
        _venue: &ConnectorRef,
        _token: TokenKind,
    ) -> Result<u64, ConnectorError> {
        let mut state = self.lock();
        if state.transient_reads > 0 {
            state.transient_reads -= 1;
            return Err(ConnectorError::Transient("rate limited".to_string()));
        }
        Ok(state.collateral)
    }

    async fn get_allowance(
        &self,
        venue: &ConnectorRef,
        token: TokenKind,
    ) -> Result<u64, ConnectorError> {
        Ok(self
            .lock()
            .allowances
            .get(&(venue.market_address.clone(), token))
            .copied()
            .unwrap_or(0))
    }

    async fn approve(
        &self,
        venue: &ConnectorRef,
        token: TokenKind,
        amount: u64,
    ) -> Result<(), ConnectorError> {
        let mut state = self.lock();
        state.approvals += 1;
        state
            .allowances
            .insert((venue.market_address.clone(), token), amount);
        Ok(())
    }

    async fn quote(&self, op: &TradeOp) -> Result<u64, ConnectorError> {
        Ok(Self::expected_output(op))
    }

    async fn estimate_effort(&self, _op: &TradeOp) -> Result<ExecutionCost, ConnectorError> {
        Ok(ExecutionCost {
            units: 1,
            unit_price: self.lock().unit_price,
        })
    }

    async fn submit(
        &self,
        op: &TradeOp,
        min_output: u64,
        fee_ceiling: u64,
    ) -> Result<Submission, ConnectorError> {
        let mut state = self.lock();
        let market = op.venue().market_address.clone();
        if state.failing_submits.contains(&market) {
            return Err(ConnectorError::Fatal("order rejected".to_string()));
        }

        if let TradeOp::Buy { amount, .. } = op {
            state.collateral = state.collateral.saturating_sub(*amount);
        }
        let output = Self::expected_output(op);
        if !matches!(op, TradeOp::Buy { .. }) {
            state.collateral += output;
        }

        state.next_handle += 1;
        let handle = format!("0xmock{}", state.next_handle);
        let unit_price = state.unit_price;
        state.pending.insert(handle.clone(), (market.clone(), output));
        state.log.push(format!("{} {}", op.label(), market));
        state.submits.push((op.clone(), min_output, fee_ceiling));

        Ok(Submission {
            handle,
            cost: ExecutionCost {
                units: 1,
                unit_price,
            },
        })
    }

    async fn await_confirmation(
        &self,
        handle: &str,
        _confirmations: u32,
    ) -> Result<ConfirmationOutcome, ConnectorError> {
        let state = self.lock();
        let (market, output_amount) = state
            .pending
            .get(handle)
            .cloned()
            .ok_or_else(|| ConnectorError::Fatal(format!("unknown handle {}", handle)))?;

        if state.reverting_markets.contains(&market) {
            return Ok(ConfirmationOutcome::Reverted {
                reason: "execution reverted".to_string(),
            });
        }
        if state.stalling_markets.contains(&market) {
            return Ok(ConfirmationOutcome::TimedOut);
        }

        Ok(ConfirmationOutcome::Confirmed { output_amount })
    }

    fn supports_redeem(&self) -> bool {
        !self.lock().redeem_unsupported
    }

    async fn write_off(
        &self,
        venue: &ConnectorRef,
        outcome: Outcome,
        tokens: u64,
    ) -> Result<(), ConnectorError> {
        self.lock()
            .write_offs
            .push((venue.market_address.clone(), outcome, tokens));
        Ok(())
    }
}

/// Feed that replays queued responses, then repeats the last successful one.
#[derive(Default)]
pub struct StaticFeed {
    queue: Mutex<VecDeque<Result<Vec<PositionSnapshot>, String>>>,
    last: Mutex<Vec<PositionSnapshot>>,
}

impl StaticFeed {
    pub fn new(snapshots: Vec<PositionSnapshot>) -> Self {
        let feed = Self::default();
        feed.push(snapshots);
        feed
    }

    pub fn push(&self, snapshots: Vec<PositionSnapshot>) {
        self.queue.lock().unwrap().push_back(Ok(snapshots));
    }

    pub fn push_failure(&self, reason: &str) {
        self.queue.lock().unwrap().push_back(Err(reason.to_string()));
    }
}

#[async_trait]
impl PositionFeed for StaticFeed {
    async fn fetch_positions(
        &self,
        _address: &str,
    ) -> Result<Vec<PositionSnapshot>, ReplicationError> {
        let next = self.queue.lock().unwrap().pop_front();
        match next {
            Some(Ok(snapshots)) => {
                *self.last.lock().unwrap() = snapshots.clone();
                Ok(snapshots)
            }
            Some(Err(reason)) => Err(ReplicationError::FeedUnavailable(reason)),
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }
}
