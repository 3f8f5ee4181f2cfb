//! The outbox table and its writer.
//!
//! Producers call [`OutboxWriter::append`] inside their own transaction; the
//! relay later reads `Pending` rows and flips the delivered ones to `Sent`.

mod error;
mod in_memory;
mod record;
mod store;
mod writer;

pub use error::{StoreError, StoreResult};
pub use in_memory::{InMemoryOutboxStore, InMemoryTransaction};
pub use record::{NewOutboxRecord, OutboxId, OutboxRecord, OutboxStatus};
pub use store::{OutboxStore, OutboxTransaction};
pub use writer::OutboxWriter;
