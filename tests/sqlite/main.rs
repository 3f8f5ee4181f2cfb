//! SQLite backend integration tests.
//!
//! Business tables and the outbox share one database file; fleet members
//! open their own connections to it.

#![cfg(feature = "sqlite")]

mod fleet;
