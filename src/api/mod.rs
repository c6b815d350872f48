//! Polymarket API clients: the live position feed and the live connector.

mod clob_client;
mod data_client;
mod types;

pub use clob_client::{ApiCredentials, ClobConnector, CTF_EXCHANGE, NEG_RISK_CTF_EXCHANGE};
pub use data_client::{group_positions, DataClient};
pub use types::*;
