//! Error taxonomy for the replication engine.

use thiserror::Error;

use crate::ledger::LedgerError;

/// Failure reported by an exchange connector.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectorError {
    /// Network hiccup or rate limit; safe to retry a read
    #[error("transient connector error: {0}")]
    Transient(String),

    /// The venue rejected the request; aborts the leg
    #[error("fatal connector error: {0}")]
    Fatal(String),
}

impl ConnectorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectorError::Transient(_))
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error()) {
            ConnectorError::Transient(e.to_string())
        } else {
            ConnectorError::Fatal(e.to_string())
        }
    }
}

/// Why a pass, leg or startup step did not go through.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Position feed could not be read; the whole cycle is skipped
    #[error("position feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("approval failed: {0}")]
    ApprovalFailure(String),

    #[error("slippage guard exceeded: {0}")]
    SlippageExceeded(String),

    #[error("fee per unit {required} exceeds ceiling {ceiling}")]
    FeeCeilingExceeded { required: u64, ceiling: u64 },

    /// Confirmation did not arrive in time; the trade may or may not have landed
    #[error("confirmation timed out after {0}s")]
    ConfirmationTimeout(u64),

    #[error("transaction reverted: {0}")]
    Reverted(String),

    #[error("submission failed: {0}")]
    Submission(String),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A confirmed fill could not be booked; the fill itself still stands
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl ReplicationError {
    /// Short machine-friendly tag used in structured logs.
    pub fn reason(&self) -> &'static str {
        match self {
            ReplicationError::FeedUnavailable(_) => "feed_unavailable",
            ReplicationError::InsufficientBalance { .. } => "insufficient_balance",
            ReplicationError::ApprovalFailure(_) => "approval_failure",
            ReplicationError::SlippageExceeded(_) => "slippage_exceeded",
            ReplicationError::FeeCeilingExceeded { .. } => "fee_ceiling_exceeded",
            ReplicationError::ConfirmationTimeout(_) => "confirmation_timeout",
            ReplicationError::Reverted(_) => "reverted",
            ReplicationError::Submission(_) => "submission",
            ReplicationError::Connector(_) => "connector",
            ReplicationError::InvalidConfig(_) => "invalid_config",
            ReplicationError::Ledger(_) => "ledger",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_error_classification() {
        assert!(ConnectorError::Transient("503".into()).is_transient());
        assert!(!ConnectorError::Fatal("bad signature".into()).is_transient());

        let wrapped: ReplicationError = ConnectorError::Fatal("nope".into()).into();
        assert_eq!(wrapped.reason(), "connector");
        assert_eq!(wrapped.to_string(), "fatal connector error: nope");
    }

    #[test]
    fn test_ledger_errors_are_tagged() {
        let wrapped: ReplicationError = LedgerError::AlreadyClosed(7).into();
        assert_eq!(wrapped.reason(), "ledger");
        assert_eq!(wrapped.to_string(), "ledger error: trade #7 is already closed");
    }
}
