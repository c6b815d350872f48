//! Data models for snapshots, replication events and local positions.

mod event;
mod outcome;
mod position;
mod snapshot;
mod units;

pub use event::{EventKind, ReplicationEvent};
pub use outcome::Outcome;
pub use position::{ConnectorRef, LocalPosition};
pub use snapshot::{PositionSnapshot, SeenPosition};
pub use units::{from_units, scale_down, to_units, COLLATERAL_DECIMALS};
