//! Replication orchestrator: consumes differ output and drives each market
//! through its open and close legs.
//!
//! Per market the lifecycle is `NONE -> PENDING_OPEN -> OPEN -> PENDING_CLOSE -> NONE`.
//! A switch runs the close leg then the open leg inside one market task, and
//! the open leg only runs if the close succeeded. A failed leg leaves the
//! market in its previous stable state and the event is re-emitted on the
//! next poll.
//!
//! Markets run concurrently up to `max_concurrent_markets`. Leg tasks only read
//! shared state; ledger and state mutations are applied afterwards in event
//! order.

use std::collections::HashMap;
use std::fmt;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::config::ReplicationConfig;
use super::connector::{ConfirmationOutcome, Connector, Submission, TokenKind, TradeOp};
use super::differ::{diff, seen_from};
use super::error::{ConnectorError, ReplicationError};
use super::retry::RetryPolicy;
use super::sizer::TradeSizer;
use crate::ledger::{BuyRecord, Ledger, LedgerStatistics, SellRecord};
use crate::models::{
    scale_down, to_units, ConnectorRef, EventKind, LocalPosition, Outcome, PositionSnapshot,
    ReplicationEvent, SeenPosition,
};

/// Callback invoked for every `Increased` event.
pub type IncreaseHook = Box<dyn Fn(&ReplicationEvent) + Send + Sync>;

/// Everything the engine must remember between passes and across restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationState {
    /// False until the first pass has recorded the target's holdings
    pub synced: bool,

    /// What the target held at the end of the last pass
    pub last_seen: HashMap<String, SeenPosition>,

    /// Our replicated positions, at most one per market
    pub positions: HashMap<String, LocalPosition>,
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub cold_start: bool,
    pub events: usize,
    pub opened: u32,
    pub closed: u32,
    pub increased: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl PassReport {
    pub fn trades(&self) -> u32 {
        self.opened + self.closed
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cold_start {
            return write!(f, "cold start: {} positions recorded", self.events);
        }
        write!(
            f,
            "{} events: {} opened, {} closed, {} increased, {} skipped, {} failed",
            self.events, self.opened, self.closed, self.increased, self.skipped, self.failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegKind {
    Open,
    Close,
}

impl LegKind {
    fn as_str(&self) -> &'static str {
        match self {
            LegKind::Open => "open",
            LegKind::Close => "close",
        }
    }
}

#[derive(Debug, Clone)]
enum Leg {
    Close {
        position: LocalPosition,
        settlement: Option<Outcome>,
    },
    Open {
        outcome: Outcome,
        size: Decimal,
    },
}

#[derive(Debug)]
struct MarketPlan {
    market_id: String,
    kind: EventKind,
    legs: Vec<Leg>,
}

#[derive(Debug)]
struct OpenFill {
    position: LocalPosition,
    fee_cost: u64,
    tx_ref: String,
}

#[derive(Debug)]
struct CloseFill {
    position: LocalPosition,
    returned: u64,
    settlement: Option<Outcome>,
    fee_cost: u64,
    tx_ref: String,
}

#[derive(Debug)]
enum Fill {
    Opened(OpenFill),
    Closed(CloseFill),
}

#[derive(Debug)]
struct MarketRun {
    fills: Vec<Fill>,
    skipped: bool,
    failure: Option<(LegKind, ReplicationError)>,
}

/// The replication engine for one target wallet.
pub struct Orchestrator<C: Connector> {
    config: ReplicationConfig,
    sizer: TradeSizer,
    retry: RetryPolicy,
    connector: C,
    ledger: Ledger,
    state: ReconciliationState,
    on_increase: IncreaseHook,
}

impl<C: Connector> Orchestrator<C> {
    /// Build an engine. Fails with `InvalidConfig` on inconsistent bounds.
    pub fn new(
        config: ReplicationConfig,
        connector: C,
        ledger: Ledger,
    ) -> Result<Self, ReplicationError> {
        config.validate()?;
        let sizer = TradeSizer::from_config(&config)?;
        let retry = config.retry.clone();

        Ok(Self {
            config,
            sizer,
            retry,
            connector,
            ledger,
            state: ReconciliationState::default(),
            on_increase: Box::new(|event| {
                info!(
                    market = %event.market_id(),
                    "Target increased position, not replicated"
                );
            }),
        })
    }

    /// Resume from persisted state.
    pub fn with_state(mut self, state: ReconciliationState) -> Self {
        self.state = state;
        self
    }

    /// Replace the default (log-only) handling of `Increased` events.
    pub fn set_increase_hook(&mut self, hook: IncreaseHook) {
        self.on_increase = hook;
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn state(&self) -> &ReconciliationState {
        &self.state
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn statistics(&self) -> &LedgerStatistics {
        self.ledger.statistics()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Forget what the target held; the next pass is a cold start.
    pub fn reset_sync(&mut self) {
        self.state.synced = false;
        self.state.last_seen.clear();
    }

    /// Run one pass over a fresh snapshot of the target wallet.
    pub async fn reconcile(&mut self, current: &[PositionSnapshot]) -> PassReport {
        if !self.state.synced {
            return self.cold_start(current);
        }

        let events = diff(
            Some(&self.state.last_seen),
            current,
            self.config.increase_threshold,
        );
        let mut report = PassReport {
            events: events.len(),
            ..Default::default()
        };

        let plans: Vec<MarketPlan> = events
            .iter()
            .filter_map(|event| self.plan(event, &mut report))
            .collect();

        let runs: Vec<MarketRun> = stream::iter(plans.iter().map(|plan| self.run_market(plan)))
            .buffered(self.config.max_concurrent_markets)
            .collect()
            .await;

        let previous_seen = std::mem::take(&mut self.state.last_seen);
        let mut next_seen = Self::observe(current, &previous_seen);

        for (plan, run) in plans.iter().zip(runs) {
            if run.skipped {
                report.skipped += 1;
            }

            for fill in run.fills {
                match fill {
                    Fill::Closed(fill) => {
                        self.apply_close(fill);
                        report.closed += 1;
                    }
                    Fill::Opened(fill) => {
                        self.apply_open(fill);
                        report.opened += 1;
                    }
                }
            }

            if let Some((leg, e)) = run.failure {
                report.failed += 1;
                warn!(
                    market = %plan.market_id,
                    event = %plan.kind,
                    leg = leg.as_str(),
                    reason = e.reason(),
                    error = %e,
                    "Leg aborted, market will be re-evaluated next poll"
                );

                match leg {
                    LegKind::Close => match previous_seen.get(&plan.market_id) {
                        Some(prev) => {
                            next_seen.insert(plan.market_id.clone(), *prev);
                        }
                        None => {
                            next_seen.remove(&plan.market_id);
                        }
                    },
                    LegKind::Open => {
                        next_seen.remove(&plan.market_id);
                    }
                }
            }
        }

        self.state.last_seen = next_seen;

        if report.trades() > 0 || report.failed > 0 {
            info!(report = %report, "Reconciliation pass complete");
        } else {
            debug!(report = %report, "Reconciliation pass complete");
        }

        report
    }

    /// First pass: record everything, trade nothing.
    fn cold_start(&mut self, current: &[PositionSnapshot]) -> PassReport {
        let last_seen = Self::observe(current, &HashMap::new());
        info!(
            markets = last_seen.len(),
            "Initial sync: recording target positions without trading"
        );

        let report = PassReport {
            cold_start: true,
            events: last_seen.len(),
            ..Default::default()
        };
        self.state.last_seen = last_seen;
        self.state.synced = true;
        report
    }

    /// The `last_seen` map the snapshot implies, before leg failures are applied.
    fn observe(
        current: &[PositionSnapshot],
        previous: &HashMap<String, SeenPosition>,
    ) -> HashMap<String, SeenPosition> {
        let mut seen = HashMap::new();
        for snapshot in current {
            if seen.contains_key(&snapshot.market_id) {
                continue;
            }
            if let Some(entry) = seen_from(snapshot, previous.get(&snapshot.market_id)) {
                seen.insert(snapshot.market_id.clone(), entry);
            }
        }
        seen
    }

    /// Turn an event into the legs to run, or `None` when nothing is traded.
    fn plan(&self, event: &ReplicationEvent, report: &mut PassReport) -> Option<MarketPlan> {
        let market_id = event.market_id().to_string();
        let held = self.state.positions.get(&market_id);

        info!(
            market = %market_id,
            event = %event.kind(),
            from = ?event.previous_outcome(),
            to = ?event.new_outcome(),
            "Target position changed"
        );

        let mut legs = Vec::new();

        match event {
            ReplicationEvent::Increased { .. } => {
                (self.on_increase)(event);
                report.increased += 1;
                return None;
            }
            ReplicationEvent::Closed {
                outcome, settlement, ..
            } => match held {
                Some(position) if position.outcome == *outcome => legs.push(Leg::Close {
                    position: position.clone(),
                    settlement: *settlement,
                }),
                _ => {
                    info!(market = %market_id, outcome = %outcome, "No local position to close, skipping");
                    report.skipped += 1;
                    return None;
                }
            },
            ReplicationEvent::Opened {
                outcome,
                target_investment,
                ..
            } => {
                if held.is_some() {
                    info!(market = %market_id, "Local position already open, skipping");
                    report.skipped += 1;
                    return None;
                }
                match self.open_leg_for(&market_id, *outcome, *target_investment) {
                    Some(leg) => legs.push(leg),
                    None => {
                        report.skipped += 1;
                        return None;
                    }
                }
            }
            ReplicationEvent::Switched {
                from,
                to,
                target_investment,
                ..
            } => {
                let closes_first = match held {
                    Some(position) if position.outcome == *from => {
                        legs.push(Leg::Close {
                            position: position.clone(),
                            settlement: None,
                        });
                        true
                    }
                    Some(_) => {
                        info!(market = %market_id, "Local position already on the new side, skipping");
                        report.skipped += 1;
                        return None;
                    }
                    None => {
                        info!(market = %market_id, "No local position to close on switch");
                        false
                    }
                };

                match self.open_leg_for(&market_id, *to, *target_investment) {
                    Some(leg) => legs.push(leg),
                    None if closes_first => {}
                    None => {
                        report.skipped += 1;
                        return None;
                    }
                }
            }
        }

        Some(MarketPlan {
            market_id,
            kind: event.kind(),
            legs,
        })
    }

    fn open_leg_for(&self, market_id: &str, outcome: Outcome, target: Decimal) -> Option<Leg> {
        let size = self.sizer.size(target);
        if size <= Decimal::ZERO {
            info!(market = %market_id, target = %target, "Trade sized to zero, skipping");
            return None;
        }
        Some(Leg::Open { outcome, size })
    }

    /// Run a market's legs in order. Reads shared state only.
    async fn run_market(&self, plan: &MarketPlan) -> MarketRun {
        let mut run = MarketRun {
            fills: Vec::new(),
            skipped: false,
            failure: None,
        };

        for leg in &plan.legs {
            let result = match leg {
                Leg::Close {
                    position,
                    settlement,
                } => self
                    .close_leg(position, *settlement)
                    .await
                    .map(|fill| Some(Fill::Closed(fill)))
                    .map_err(|e| (LegKind::Close, e)),
                Leg::Open { outcome, size } => self
                    .open_leg(&plan.market_id, *outcome, *size)
                    .await
                    .map(|fill| fill.map(Fill::Opened))
                    .map_err(|e| (LegKind::Open, e)),
            };

            match result {
                Ok(Some(fill)) => run.fills.push(fill),
                Ok(None) => run.skipped = true,
                Err(failure) => {
                    run.failure = Some(failure);
                    break;
                }
            }
        }

        run
    }

    /// Connector read with bounded retries on transient errors.
    async fn read<T, F, Fut>(&self, what: &str, op: F) -> Result<T, ReplicationError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ConnectorError>>,
    {
        self.retry.run(what, op).await.map_err(ReplicationError::from)
    }

    async fn open_leg(
        &self,
        market_id: &str,
        outcome: Outcome,
        size: Decimal,
    ) -> Result<Option<OpenFill>, ReplicationError> {
        let venue = self
            .read("resolve_market", || self.connector.resolve_market(market_id, outcome))
            .await?;

        let amount = to_units(size, venue.decimals);
        if amount == 0 {
            info!(market = %market_id, size = %size, "Trade size below one base unit, skipping");
            return Ok(None);
        }

        let available = self
            .read("get_balance", || {
                self.connector.get_balance(&venue, TokenKind::Collateral)
            })
            .await?;
        if available < amount {
            return Err(ReplicationError::InsufficientBalance {
                required: amount,
                available,
            });
        }

        self.ensure_allowance(&venue, TokenKind::Collateral, amount)
            .await?;

        let op = TradeOp::Buy {
            venue: venue.clone(),
            outcome,
            amount,
        };
        let expected = self.read("quote", || self.connector.quote(&op)).await?;
        if expected == 0 {
            return Err(ReplicationError::SlippageExceeded(
                "quote returned no output".to_string(),
            ));
        }
        let min_output = scale_down(
            expected,
            10_000 - u64::from(self.config.slippage_bps),
            10_000,
        );

        debug!(
            market = %market_id,
            outcome = %outcome,
            amount,
            expected,
            min_output,
            "Submitting open leg"
        );

        let submission = self.execute(market_id, &op, min_output).await?;
        let token_amount = self.confirm(market_id, &submission).await?;

        info!(
            market = %market_id,
            outcome = %outcome,
            amount,
            tokens = token_amount,
            tx = %submission.handle,
            "Opened position"
        );

        Ok(Some(OpenFill {
            position: LocalPosition {
                market_id: market_id.to_string(),
                outcome,
                invested_amount: amount,
                token_amount,
                connector_ref: venue,
                trade_id: 0,
                opened_at: Utc::now(),
            },
            fee_cost: submission.cost.total(),
            tx_ref: submission.handle,
        }))
    }

    async fn close_leg(
        &self,
        position: &LocalPosition,
        settlement: Option<Outcome>,
    ) -> Result<CloseFill, ReplicationError> {
        let market_id = position.market_id.as_str();
        let venue = &position.connector_ref;

        if let Some(winner) = settlement {
            if winner != position.outcome {
                info!(
                    market = %market_id,
                    held = %position.outcome,
                    winner = %winner,
                    "Market resolved against us, recording zero return"
                );
                if let Err(e) = self
                    .connector
                    .write_off(venue, position.outcome, position.token_amount)
                    .await
                {
                    warn!(market = %market_id, error = %e, "Failed to write off losing tokens");
                }
                return Ok(CloseFill {
                    position: position.clone(),
                    returned: 0,
                    settlement,
                    fee_cost: 0,
                    tx_ref: String::new(),
                });
            }

            if !self.connector.supports_redeem() {
                // Each winning token settles at one unit of collateral
                warn!(
                    market = %market_id,
                    outcome = %position.outcome,
                    tokens = position.token_amount,
                    "Venue cannot redeem, booking settlement value; redeem the tokens manually"
                );
                return Ok(CloseFill {
                    position: position.clone(),
                    returned: position.token_amount,
                    settlement,
                    fee_cost: 0,
                    tx_ref: String::new(),
                });
            }
        }

        let token = TokenKind::Outcome(position.outcome);
        self.ensure_allowance(venue, token, position.token_amount)
            .await?;

        let op = match settlement {
            Some(winning_outcome) => TradeOp::Redeem {
                venue: venue.clone(),
                outcome: position.outcome,
                tokens: position.token_amount,
                invested: position.invested_amount,
                winning_outcome,
            },
            None => TradeOp::Sell {
                venue: venue.clone(),
                outcome: position.outcome,
                tokens: position.token_amount,
            },
        };

        let expected = self.read("quote", || self.connector.quote(&op)).await?;
        let min_output = scale_down(
            expected,
            100 - u64::from(self.config.sell_haircut_pct),
            100,
        );

        debug!(
            market = %market_id,
            op = op.label(),
            tokens = position.token_amount,
            expected,
            min_output,
            "Submitting close leg"
        );

        let submission = self.execute(market_id, &op, min_output).await?;
        let returned = self.confirm(market_id, &submission).await?;

        info!(
            market = %market_id,
            outcome = %position.outcome,
            returned,
            invested = position.invested_amount,
            tx = %submission.handle,
            "Closed position"
        );

        Ok(CloseFill {
            position: position.clone(),
            returned,
            settlement,
            fee_cost: submission.cost.total(),
            tx_ref: submission.handle,
        })
    }

    async fn ensure_allowance(
        &self,
        venue: &ConnectorRef,
        token: TokenKind,
        amount: u64,
    ) -> Result<(), ReplicationError> {
        let allowance = self
            .read("get_allowance", || self.connector.get_allowance(venue, token))
            .await
            .map_err(|e| ReplicationError::ApprovalFailure(e.to_string()))?;
        if allowance >= amount {
            return Ok(());
        }

        debug!(token = ?token, allowance, amount, "Approving trade venue");
        self.connector
            .approve(venue, token, amount)
            .await
            .map_err(|e| ReplicationError::ApprovalFailure(e.to_string()))
    }

    /// Fee check, then a single submission. Never retried.
    async fn execute(
        &self,
        market_id: &str,
        op: &TradeOp,
        min_output: u64,
    ) -> Result<Submission, ReplicationError> {
        let effort = self
            .read("estimate_effort", || self.connector.estimate_effort(op))
            .await?;
        if effort.unit_price > self.config.fee_ceiling {
            return Err(ReplicationError::FeeCeilingExceeded {
                required: effort.unit_price,
                ceiling: self.config.fee_ceiling,
            });
        }

        self.connector
            .submit(op, min_output, self.config.fee_ceiling)
            .await
            .map_err(|e| {
                warn!(market = %market_id, op = op.label(), error = %e, "Submission failed");
                ReplicationError::Submission(e.to_string())
            })
    }

    /// Wait for confirmation; returns the amount received.
    async fn confirm(
        &self,
        market_id: &str,
        submission: &Submission,
    ) -> Result<u64, ReplicationError> {
        let wait = self
            .connector
            .await_confirmation(&submission.handle, self.config.confirmations);

        match timeout(self.config.confirmation_timeout(), wait).await {
            Ok(Ok(ConfirmationOutcome::Confirmed { output_amount })) => Ok(output_amount),
            Ok(Ok(ConfirmationOutcome::Reverted { reason })) => {
                warn!(market = %market_id, tx = %submission.handle, reason = %reason, "Transaction reverted");
                Err(ReplicationError::Reverted(reason))
            }
            Ok(Ok(ConfirmationOutcome::TimedOut)) | Err(_) => {
                error!(
                    market = %market_id,
                    tx = %submission.handle,
                    timeout_secs = self.config.confirmation_timeout_secs,
                    "Confirmation timed out, manual reconciliation review required"
                );
                Err(ReplicationError::ConfirmationTimeout(
                    self.config.confirmation_timeout_secs,
                ))
            }
            Ok(Err(e)) => Err(ReplicationError::Connector(e)),
        }
    }

    fn apply_close(&mut self, fill: CloseFill) {
        let CloseFill {
            position,
            returned,
            settlement,
            fee_cost,
            tx_ref,
        } = fill;

        let record = SellRecord {
            market_id: position.market_id.clone(),
            outcome: position.outcome,
            amount: returned,
            token_amount: position.token_amount,
            fee_cost,
            tx_ref,
            linked_buy: Some(position.trade_id),
            settlement,
        };

        if let Err(e) = self.ledger.record_sell(record.clone()) {
            let e = ReplicationError::from(e);
            warn!(
                market = %position.market_id,
                trade_id = position.trade_id,
                reason = e.reason(),
                error = %e,
                "Linked BUY unusable, recording SELL by market"
            );
            if let Err(e) = self.ledger.record_sell(SellRecord {
                linked_buy: None,
                ..record
            }) {
                let e = ReplicationError::from(e);
                error!(
                    market = %position.market_id,
                    reason = e.reason(),
                    error = %e,
                    "Failed to record SELL"
                );
            }
        }

        self.state.positions.remove(&position.market_id);
    }

    fn apply_open(&mut self, fill: OpenFill) {
        let OpenFill {
            mut position,
            fee_cost,
            tx_ref,
        } = fill;

        let record = BuyRecord {
            market_id: position.market_id.clone(),
            outcome: position.outcome,
            amount: position.invested_amount,
            token_amount: position.token_amount,
            fee_cost,
            tx_ref,
        };

        match self.ledger.record_buy(record) {
            Ok(trade_id) => position.trade_id = trade_id,
            Err(e) => {
                let e = ReplicationError::from(e);
                error!(
                    market = %position.market_id,
                    reason = e.reason(),
                    error = %e,
                    "Failed to record BUY, position tracked without ledger entry"
                );
            }
        }

        self.state
            .positions
            .insert(position.market_id.clone(), position);
    }
}
