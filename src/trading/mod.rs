//! Replication engine: snapshot diffing, trade sizing and leg orchestration.

mod config;
mod connector;
mod differ;
mod error;
mod orchestrator;
mod retry;
mod sizer;

#[cfg(test)]
pub mod testing;

pub use config::ReplicationConfig;
pub use connector::{
    ConfirmationOutcome, Connector, ExecutionCost, PositionFeed, Submission, TokenKind, TradeOp,
};
pub use differ::{diff, seen_from};
pub use error::{ConnectorError, ReplicationError};
pub use orchestrator::{IncreaseHook, Orchestrator, PassReport, ReconciliationState};
pub use retry::RetryPolicy;
pub use sizer::{size, TradeSizer};
