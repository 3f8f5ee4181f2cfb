use thiserror::Error;

/// Errors raised by an outbox store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A thread panicked while holding the store's lock.
    #[error("store lock poisoned: {0}")]
    Poisoned(&'static str),

    /// A persisted value could not be mapped back to a record.
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("migration error: {0}")]
    Migration(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
