//! Snapshot differ: turns two successive views of the target wallet into
//! replication events.
//!
//! Pure and deterministic. Events follow the order of the current snapshot;
//! closes for markets that vanished from the feed are appended last, sorted
//! by market id.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use tracing::warn;

use crate::models::{Outcome, PositionSnapshot, ReplicationEvent, SeenPosition};

/// Compare `current` against what was last seen and emit the changes.
///
/// `previous` is `None` when nothing has ever been recorded; every held
/// position is then reported as opened.
pub fn diff(
    previous: Option<&HashMap<String, SeenPosition>>,
    current: &[PositionSnapshot],
    increase_threshold: Decimal,
) -> Vec<ReplicationEvent> {
    let mut events = Vec::new();
    let mut seen_ids: HashSet<&str> = HashSet::new();

    for snapshot in current {
        if !seen_ids.insert(snapshot.market_id.as_str()) {
            warn!(market = %snapshot.market_id, "Duplicate market in snapshot, ignoring later entry");
            continue;
        }

        let prev = previous.and_then(|p| p.get(&snapshot.market_id));
        if let Some(event) = diff_market(prev, snapshot, increase_threshold) {
            events.push(event);
        }
    }

    if let Some(previous) = previous {
        let mut vanished: Vec<(&String, &SeenPosition)> = previous
            .iter()
            .filter(|(id, seen)| !seen.resolved && !seen_ids.contains(id.as_str()))
            .collect();
        vanished.sort_by(|a, b| a.0.cmp(b.0));

        events.extend(vanished.into_iter().map(|(id, seen)| ReplicationEvent::Closed {
            market_id: id.clone(),
            outcome: seen.outcome,
            settlement: None,
        }));
    }

    events
}

fn diff_market(
    prev: Option<&SeenPosition>,
    snapshot: &PositionSnapshot,
    increase_threshold: Decimal,
) -> Option<ReplicationEvent> {
    let market_id = snapshot.market_id.clone();

    if snapshot.resolved {
        return match prev {
            Some(seen) if !seen.resolved => Some(ReplicationEvent::Closed {
                market_id,
                outcome: seen.outcome,
                settlement: snapshot.winning_outcome,
            }),
            _ => None,
        };
    }

    let held = snapshot.held_outcome(prev.map(|s| s.outcome));
    if snapshot.is_tied() {
        warn!(
            market = %snapshot.market_id,
            balance = snapshot.balance_of(Outcome::SideA),
            chosen = ?held,
            "Equal balances on both outcomes, tie resolved"
        );
    }

    match (prev, held) {
        (None, None) => None,
        (Some(seen), None) => Some(ReplicationEvent::Closed {
            market_id,
            outcome: seen.outcome,
            settlement: None,
        }),
        (None, Some(outcome)) => Some(ReplicationEvent::Opened {
            market_id,
            outcome,
            target_investment: snapshot.investment_of(outcome),
        }),
        (Some(seen), Some(outcome)) if seen.outcome != outcome => {
            Some(ReplicationEvent::Switched {
                market_id,
                from: seen.outcome,
                to: outcome,
                target_investment: snapshot.investment_of(outcome),
            })
        }
        (Some(seen), Some(outcome)) => {
            let balance = snapshot.balance_of(outcome);
            // A limit too large to represent can never be exceeded
            let exceeded = Decimal::ONE
                .checked_add(increase_threshold)
                .and_then(|factor| Decimal::from(seen.balance).checked_mul(factor))
                .is_some_and(|limit| Decimal::from(balance) > limit);
            if exceeded {
                Some(ReplicationEvent::Increased {
                    market_id,
                    outcome,
                    previous_balance: seen.balance,
                    balance,
                    target_investment: snapshot.investment_of(outcome),
                })
            } else {
                None
            }
        }
    }
}

/// The `lastSeen` entry a snapshot produces, if the market is still tracked.
///
/// Resolved markets are remembered as resolved so they never trigger a
/// second close.
pub fn seen_from(
    snapshot: &PositionSnapshot,
    previous: Option<&SeenPosition>,
) -> Option<SeenPosition> {
    if snapshot.resolved {
        let outcome = previous
            .map(|p| p.outcome)
            .or_else(|| snapshot.held_outcome(None))?;
        return Some(SeenPosition {
            outcome,
            balance: snapshot.balance_of(outcome),
            resolved: true,
        });
    }

    let outcome = snapshot.held_outcome(previous.map(|p| p.outcome))?;
    Some(SeenPosition {
        outcome,
        balance: snapshot.balance_of(outcome),
        resolved: false,
    })
}
