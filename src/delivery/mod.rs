//! Delivery channel - the broker seen through two calls
//!
//! ```text
//! ┌──────────────┐   publish(destination, routing_key, payload)   ┌────────┐
//! │ OutboxRelay  │ ─────────────────────────────────────────────▶ │        │
//! └──────────────┘                                                │ Broker │
//! ┌──────────────┐   exists(destination)                          │        │
//! │ TopologyProbe│ ─────────────────────────────────────────────▶ │        │
//! └──────────────┘                                                └────────┘
//! ```
//!
//! `BoundedChannel` puts a deadline on both calls; `InMemoryBroker` is the
//! included implementation for tests and single-process use.

mod bounded;
mod channel;
mod in_memory;

pub use bounded::{BoundedChannel, DEFAULT_MAX_STUCK_CALLS};
pub use channel::{DeliveryChannel, PublishError};
pub use in_memory::{Delivery, InMemoryBroker};
