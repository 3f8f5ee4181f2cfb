//! Schema migrations for the outbox and lock tables.
//!
//! Applied in order and tracked in `outbox_relay_migrations`, so the tables
//! can live in the application's own database next to its business tables.

use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::outbox::{StoreError, StoreResult};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS outbox_relay_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM outbox_relay_migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {current_version} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running outbox migrations");

    if current_version < 1 {
        migrate_v1_outbox_records(conn)?;
    }
    if current_version < 2 {
        migrate_v2_fleet_locks(conn)?;
    }

    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO outbox_relay_migrations (version, name) VALUES (?1, ?2)",
        params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: outbox table.
fn migrate_v1_outbox_records(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS outbox_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            destination TEXT NOT NULL,
            routing_key TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING'
                CHECK (status IN ('PENDING', 'SENT', 'FAILED')),
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_outbox_records_status
            ON outbox_records(status, id);
        ",
    )?;
    record_migration(conn, 1, "outbox_records")
}

/// V2: fleet lock rows, one per job name.
fn migrate_v2_fleet_locks(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS fleet_locks (
            name TEXT PRIMARY KEY,
            lock_until INTEGER NOT NULL,
            locked_at INTEGER NOT NULL,
            locked_by TEXT NOT NULL
        );
        ",
    )?;
    record_migration(conn, 2, "fleet_locks")
}
