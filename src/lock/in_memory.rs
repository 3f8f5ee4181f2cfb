use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::lock::new_holder_token;
use super::{FleetLock, HoldBounds, LockError, LockHandle};
use crate::clock::{Clock, SystemClock};

#[derive(Clone, Debug)]
struct LockRow {
    lock_until: DateTime<Utc>,
    locked_by: String,
}

/// In-memory lock table shared by every clone.
///
/// Stands in for the shared lock store when all "fleet members" live in one
/// process (tests, single-node deployments). It follows the same row
/// protocol as the SQLite lock: one row per job name, taken only when absent
/// or expired.
#[derive(Clone)]
pub struct InMemoryFleetLock {
    rows: Arc<Mutex<HashMap<String, LockRow>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryFleetLock {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFleetLock {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            rows: Arc::new(Mutex::new(HashMap::new())),
            clock: Arc::new(clock),
        }
    }

    /// Current expiry of a job's row, if any.
    pub fn lock_until(&self, job_name: &str) -> Result<Option<DateTime<Utc>>, LockError> {
        let rows = self
            .rows
            .lock()
            .map_err(|e| LockError::Poisoned(e.to_string()))?;
        Ok(rows.get(job_name).map(|row| row.lock_until))
    }
}

impl FleetLock for InMemoryFleetLock {
    fn acquire(
        &self,
        job_name: &str,
        bounds: HoldBounds,
    ) -> Result<Option<LockHandle>, LockError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|e| LockError::Poisoned(e.to_string()))?;
        let now = self.clock.now();

        if let Some(row) = rows.get(job_name) {
            if row.lock_until > now {
                debug!(job = job_name, held_by = %row.locked_by, until = %row.lock_until, "lock busy");
                return Ok(None);
            }
        }

        let handle = LockHandle::new(job_name, new_holder_token(), now, bounds);
        rows.insert(
            job_name.to_string(),
            LockRow {
                lock_until: handle.expires_at(),
                locked_by: handle.holder().to_string(),
            },
        );
        Ok(Some(handle))
    }

    fn release(&self, handle: LockHandle) -> Result<(), LockError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|e| LockError::Poisoned(e.to_string()))?;
        let now = self.clock.now();

        match rows.get_mut(handle.job_name()) {
            Some(row) if row.locked_by == handle.holder() => {
                row.lock_until = handle.release_until(now);
            }
            _ => {
                debug!(job = handle.job_name(), "lock no longer held by this handle, nothing to release");
            }
        }
        Ok(())
    }
}
