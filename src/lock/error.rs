use std::time::Duration;

use thiserror::Error;

/// Error type for fleet lock operations.
///
/// Losing a race for the lock is not an error: `acquire` returns `Ok(None)`.
#[derive(Error, Debug)]
pub enum LockError {
    /// The in-process lock table was poisoned (a thread panicked while holding it).
    #[error("lock poisoned: {0}")]
    Poisoned(String),

    /// The shared lock store could not be reached or rejected the statement.
    #[error("lock backend error: {0}")]
    Backend(String),

    #[error("invalid hold bounds: at least {min:?} exceeds at most {max:?}")]
    InvalidBounds { min: Duration, max: Duration },
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for LockError {
    fn from(err: rusqlite::Error) -> Self {
        LockError::Backend(err.to_string())
    }
}
