use std::time::Duration;

use chrono::{DateTime, Utc};

use super::LockError;
use crate::clock;

/// How long an acquired lock is held, at minimum and at most.
///
/// `at_least` keeps a fast run from being repeated immediately by another
/// fleet member whose timer fires a moment later. `at_most` bounds how long a
/// crashed holder can keep everyone else out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HoldBounds {
    at_least: Duration,
    at_most: Duration,
}

impl Default for HoldBounds {
    /// Five seconds at least, one minute at most.
    fn default() -> Self {
        Self {
            at_least: Duration::from_secs(5),
            at_most: Duration::from_secs(60),
        }
    }
}

impl HoldBounds {
    pub fn new(at_least: Duration, at_most: Duration) -> Result<Self, LockError> {
        if at_least > at_most {
            return Err(LockError::InvalidBounds {
                min: at_least,
                max: at_most,
            });
        }
        Ok(Self { at_least, at_most })
    }

    pub fn at_least(&self) -> Duration {
        self.at_least
    }

    pub fn at_most(&self) -> Duration {
        self.at_most
    }
}

/// Proof of a successful acquisition, needed to release.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockHandle {
    job_name: String,
    holder: String,
    locked_at: DateTime<Utc>,
    bounds: HoldBounds,
}

impl LockHandle {
    pub(crate) fn new(
        job_name: impl Into<String>,
        holder: impl Into<String>,
        locked_at: DateTime<Utc>,
        bounds: HoldBounds,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            holder: holder.into(),
            locked_at,
            bounds,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Token identifying this acquisition; release is conditional on it.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn locked_at(&self) -> DateTime<Utc> {
        self.locked_at
    }

    pub fn bounds(&self) -> HoldBounds {
        self.bounds
    }

    /// Expiry written at acquisition: `locked_at + at_most`.
    pub fn expires_at(&self) -> DateTime<Utc> {
        clock::shift(self.locked_at, self.bounds.at_most)
    }

    /// Expiry to write on release: never earlier than `locked_at + at_least`.
    pub fn release_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        clock::shift(self.locked_at, self.bounds.at_least).max(now)
    }
}

/// Fleet-wide mutual exclusion keyed by job name.
///
/// A successful `acquire` guarantees no other member acquires the same job
/// name until `at_least` has elapsed, and that the lock frees itself after
/// `at_most` even if `release` is never called.
pub trait FleetLock: Send + Sync {
    /// Try to take the lock. `Ok(None)` means someone else holds it.
    fn acquire(&self, job_name: &str, bounds: HoldBounds)
        -> Result<Option<LockHandle>, LockError>;

    /// Give the lock back, if this handle still owns it.
    fn release(&self, handle: LockHandle) -> Result<(), LockError>;
}

impl<L: FleetLock + ?Sized> FleetLock for std::sync::Arc<L> {
    fn acquire(
        &self,
        job_name: &str,
        bounds: HoldBounds,
    ) -> Result<Option<LockHandle>, LockError> {
        (**self).acquire(job_name, bounds)
    }

    fn release(&self, handle: LockHandle) -> Result<(), LockError> {
        (**self).release(handle)
    }
}

pub(crate) fn new_holder_token() -> String {
    uuid::Uuid::new_v4().to_string()
}
