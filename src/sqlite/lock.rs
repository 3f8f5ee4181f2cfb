use rusqlite::params;
use tracing::debug;

use super::database::{to_millis, SqliteDatabase};
use crate::lock::{new_holder_token, FleetLock, HoldBounds, LockError, LockHandle};
use crate::outbox::StoreError;

/// Fleet lock rows in the `fleet_locks` table.
///
/// Every process pointing at the same database file competes for the same
/// rows. Acquisition is a single conditional upsert, so two members can
/// never both see themselves as the winner.
#[derive(Clone)]
pub struct SqliteFleetLock {
    db: SqliteDatabase,
}

impl SqliteFleetLock {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }
}

fn backend(err: StoreError) -> LockError {
    match err {
        StoreError::Poisoned(what) => LockError::Poisoned(what.to_string()),
        other => LockError::Backend(other.to_string()),
    }
}

impl FleetLock for SqliteFleetLock {
    fn acquire(
        &self,
        job_name: &str,
        bounds: HoldBounds,
    ) -> Result<Option<LockHandle>, LockError> {
        let conn = self.db.lock().map_err(backend)?;
        let now = self.db.now();
        let handle = LockHandle::new(job_name, new_holder_token(), now, bounds);

        let changed = conn.execute(
            "INSERT INTO fleet_locks (name, lock_until, locked_at, locked_by)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                lock_until = excluded.lock_until,
                locked_at = excluded.locked_at,
                locked_by = excluded.locked_by
             WHERE fleet_locks.lock_until <= excluded.locked_at",
            params![
                job_name,
                to_millis(handle.expires_at()),
                to_millis(now),
                handle.holder()
            ],
        )?;

        if changed == 1 {
            debug!(job = job_name, holder = handle.holder(), "fleet lock acquired");
            Ok(Some(handle))
        } else {
            debug!(job = job_name, "lock busy");
            Ok(None)
        }
    }

    fn release(&self, handle: LockHandle) -> Result<(), LockError> {
        let conn = self.db.lock().map_err(backend)?;
        let until = handle.release_until(self.db.now());

        let changed = conn.execute(
            "UPDATE fleet_locks SET lock_until = ?1 WHERE name = ?2 AND locked_by = ?3",
            params![to_millis(until), handle.job_name(), handle.holder()],
        )?;
        if changed == 0 {
            debug!(job = handle.job_name(), "lock no longer held by this handle, nothing to release");
        }
        Ok(())
    }
}
