use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{info, warn};

use super::migrations;
use crate::clock::{Clock, SystemClock};
use crate::outbox::{StoreError, StoreResult};

/// A shared SQLite connection with the outbox schema applied.
///
/// Clones share the connection. Fleet members in different processes each
/// open their own `SqliteDatabase` on the same file.
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl SqliteDatabase {
    /// Open a database file, creating it and running migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Migration(format!("creating {}: {e}", parent.display()))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        migrations::run_migrations(&conn)?;
        info!(path = %path.display(), "outbox database opened");

        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database for testing.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        // WAL does not apply to in-memory databases
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source used for record timestamps and lock expiry.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Run a closure against the connection outside any outbox transaction.
    ///
    /// Useful for creating business tables or inspecting state in tests.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> StoreResult<T> {
        let conn = self.lock()?;
        Ok(f(&conn)?)
    }

    /// Check out the connection.
    ///
    /// A thread that panicked while holding it leaves the mutex poisoned.
    /// The connection itself is still usable once any transaction it left
    /// open is rolled back, so the poison is cleared rather than returned.
    pub(crate) fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        match self.conn.lock() {
            Ok(conn) => Ok(conn),
            Err(poisoned) => {
                let conn = poisoned.into_inner();
                self.conn.clear_poison();
                warn!("sqlite connection was held by a panicking thread, recovering it");
                if !conn.is_autocommit() {
                    conn.execute_batch("ROLLBACK")?;
                }
                Ok(conn)
            }
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::InvalidData(format!("timestamp out of range: {millis}")))
}
