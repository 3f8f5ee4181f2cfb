use thiserror::Error;

use crate::lock::LockError;
use crate::outbox::StoreError;

/// Failures that abort a relay run.
///
/// Publish failures are not here: they are per record, counted in the run
/// report, and retried on the next run.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("outbox store: {0}")]
    Store(#[from] StoreError),

    #[error("fleet lock: {0}")]
    Lock(#[from] LockError),
}

pub type RelayResult<T> = Result<T, RelayError>;
