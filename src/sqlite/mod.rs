//! SQLite backend for the outbox table and the fleet lock.
//!
//! Both live in the application's database, so outbox rows commit together
//! with business rows written through [`SqliteTransaction::connection`].

mod database;
mod lock;
pub mod migrations;
mod store;

pub use database::SqliteDatabase;
pub use lock::SqliteFleetLock;
pub use store::{SqliteOutboxStore, SqliteTransaction};
