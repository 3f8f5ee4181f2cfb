//! Fleet lock: at most one replica runs a given job at a time.
//!
//! The lock is a row per job name holding the current holder's token and an
//! expiry. Acquire writes the row only if it is absent or expired; release
//! shortens the expiry to the minimum hold, and only if the caller still owns
//! the row.

mod error;
mod in_memory;
#[allow(clippy::module_inception)]
mod lock;

pub use error::LockError;
pub use in_memory::InMemoryFleetLock;
pub use lock::{FleetLock, HoldBounds, LockHandle};

pub(crate) use lock::new_holder_token;
