//! The relay job and its ticker.

#[allow(clippy::module_inception)]
mod relay;
mod thread;

pub use relay::{OutboxRelay, RunReport, RunStats, SkipReason, DEFAULT_JOB_NAME};
pub use thread::{RelayStats, RelayThread};
