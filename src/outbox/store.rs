use super::{NewOutboxRecord, OutboxId, OutboxRecord, OutboxStatus, StoreResult};

/// A transaction scope over the outbox table.
///
/// Writes are invisible to other readers until `commit`. Dropping a
/// transaction without committing rolls it back, which also discards any
/// outbox rows appended through it.
pub trait OutboxTransaction {
    /// Append a `Pending` record. The id is assigned by the store.
    fn insert(&mut self, record: NewOutboxRecord) -> StoreResult<OutboxId>;

    /// Stage `Pending -> Sent` for the given ids.
    ///
    /// Only records still `Pending` when the statement applies are changed;
    /// the return value is how many were.
    fn mark_sent(&mut self, ids: &[OutboxId]) -> StoreResult<usize>;

    /// Stage `Pending -> Failed` for the given ids. Operator intervention only.
    fn mark_failed(&mut self, ids: &[OutboxId]) -> StoreResult<usize>;

    fn commit(self) -> StoreResult<()>
    where
        Self: Sized;

    fn rollback(self) -> StoreResult<()>
    where
        Self: Sized;
}

/// Durable, append-only table of outbox records.
///
/// Many writers insert concurrently through their own transactions; a single
/// relay reads pending rows and updates their status.
pub trait OutboxStore: Send + Sync {
    type Tx<'a>: OutboxTransaction
    where
        Self: 'a;

    fn begin(&self) -> StoreResult<Self::Tx<'_>>;

    /// Committed records with the given status, oldest id first.
    fn load_by_status(&self, status: OutboxStatus) -> StoreResult<Vec<OutboxRecord>>;

    fn find(&self, id: OutboxId) -> StoreResult<Option<OutboxRecord>>;

    fn load_pending(&self) -> StoreResult<Vec<OutboxRecord>> {
        self.load_by_status(OutboxStatus::Pending)
    }
}

impl<S: OutboxStore + ?Sized> OutboxStore for std::sync::Arc<S> {
    type Tx<'a>
        = S::Tx<'a>
    where
        Self: 'a;

    fn begin(&self) -> StoreResult<Self::Tx<'_>> {
        (**self).begin()
    }

    fn load_by_status(&self, status: OutboxStatus) -> StoreResult<Vec<OutboxRecord>> {
        (**self).load_by_status(status)
    }

    fn find(&self, id: OutboxId) -> StoreResult<Option<OutboxRecord>> {
        (**self).find(id)
    }
}
