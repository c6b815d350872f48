//! Semantic changes detected between two snapshots of the target wallet.

use rust_decimal::Decimal;

use super::Outcome;

/// Tag of a [`ReplicationEvent`], useful for logging and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Opened,
    Closed,
    Switched,
    Increased,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Opened => "OPENED",
            EventKind::Closed => "CLOSED",
            EventKind::Switched => "SWITCHED",
            EventKind::Increased => "INCREASED",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change in the target's position that the engine may replicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationEvent {
    /// Target entered a market we had not seen before
    Opened {
        market_id: String,
        outcome: Outcome,
        target_investment: Decimal,
    },

    /// Target left a market, either by exiting or through resolution
    Closed {
        market_id: String,
        outcome: Outcome,
        /// Winning side when the close comes from market resolution
        settlement: Option<Outcome>,
    },

    /// Target moved from one side of a market to the other
    Switched {
        market_id: String,
        from: Outcome,
        to: Outcome,
        target_investment: Decimal,
    },

    /// Target added to an existing position beyond the configured threshold
    Increased {
        market_id: String,
        outcome: Outcome,
        previous_balance: u64,
        balance: u64,
        target_investment: Decimal,
    },
}

impl ReplicationEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ReplicationEvent::Opened { .. } => EventKind::Opened,
            ReplicationEvent::Closed { .. } => EventKind::Closed,
            ReplicationEvent::Switched { .. } => EventKind::Switched,
            ReplicationEvent::Increased { .. } => EventKind::Increased,
        }
    }

    pub fn market_id(&self) -> &str {
        match self {
            ReplicationEvent::Opened { market_id, .. }
            | ReplicationEvent::Closed { market_id, .. }
            | ReplicationEvent::Switched { market_id, .. }
            | ReplicationEvent::Increased { market_id, .. } => market_id,
        }
    }

    pub fn previous_outcome(&self) -> Option<Outcome> {
        match self {
            ReplicationEvent::Opened { .. } => None,
            ReplicationEvent::Closed { outcome, .. } => Some(*outcome),
            ReplicationEvent::Switched { from, .. } => Some(*from),
            ReplicationEvent::Increased { outcome, .. } => Some(*outcome),
        }
    }

    pub fn new_outcome(&self) -> Option<Outcome> {
        match self {
            ReplicationEvent::Opened { outcome, .. } => Some(*outcome),
            ReplicationEvent::Closed { .. } => None,
            ReplicationEvent::Switched { to, .. } => Some(*to),
            ReplicationEvent::Increased { outcome, .. } => Some(*outcome),
        }
    }

    pub fn target_investment(&self) -> Decimal {
        match self {
            ReplicationEvent::Opened { target_investment, .. }
            | ReplicationEvent::Switched { target_investment, .. }
            | ReplicationEvent::Increased { target_investment, .. } => *target_investment,
            ReplicationEvent::Closed { .. } => Decimal::ZERO,
        }
    }
}
