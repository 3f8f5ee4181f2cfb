//! Transactional outbox relay.
//!
//! Business code appends events to an outbox table inside its own
//! transaction with [`OutboxWriter`]. An [`OutboxRelay`], guarded by a
//! fleet-wide [`FleetLock`], periodically publishes every `Pending` record
//! through a [`DeliveryChannel`] and marks the accepted ones `Sent`.
//! Delivery is at least once. [`BrokerTopologyProbe`] reports whether the
//! broker has every destination the relay needs.

pub mod clock;
pub mod config;
pub mod delivery;
mod error;
pub mod lock;
pub mod outbox;
pub mod probe;
pub mod relay;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "http")]
pub mod http;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, RelayConfig};
pub use delivery::{BoundedChannel, Delivery, DeliveryChannel, InMemoryBroker, PublishError};
pub use error::{RelayError, RelayResult};
pub use lock::{FleetLock, HoldBounds, InMemoryFleetLock, LockError, LockHandle};
pub use outbox::{
    InMemoryOutboxStore, InMemoryTransaction, NewOutboxRecord, OutboxId, OutboxRecord,
    OutboxStatus, OutboxStore, OutboxTransaction, OutboxWriter, StoreError, StoreResult,
};
pub use probe::{BrokerTopologyProbe, TopologyHealth};
pub use relay::{
    OutboxRelay, RelayStats, RelayThread, RunReport, RunStats, SkipReason, DEFAULT_JOB_NAME,
};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteDatabase, SqliteFleetLock, SqliteOutboxStore, SqliteTransaction};
