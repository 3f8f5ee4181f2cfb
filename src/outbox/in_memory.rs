//! In-memory outbox store for tests and single-process use.
//!
//! Transactions buffer their writes and apply them under one write lock on
//! `commit`, so readers only ever see committed rows. Dropping a transaction
//! discards the buffer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use crate::clock::{Clock, SystemClock};

use super::{
    NewOutboxRecord, OutboxId, OutboxRecord, OutboxStatus, OutboxStore, OutboxTransaction,
    StoreError, StoreResult,
};

/// Thread-safe in-memory outbox table.
///
/// Cloning creates another handle to the same table.
#[derive(Clone)]
pub struct InMemoryOutboxStore {
    inner: Arc<Inner>,
}

struct Inner {
    rows: RwLock<BTreeMap<OutboxId, OutboxRecord>>,
    next_id: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                rows: RwLock::new(BTreeMap::new()),
                next_id: AtomicI64::new(1),
                clock: Arc::new(clock),
            }),
        }
    }

    /// Number of committed records, any status.
    pub fn len(&self) -> usize {
        self.inner.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every committed record, oldest first.
    pub fn records(&self) -> StoreResult<Vec<OutboxRecord>> {
        let rows = self
            .inner
            .rows
            .read()
            .map_err(|_| StoreError::Poisoned("outbox rows"))?;
        Ok(rows.values().cloned().collect())
    }
}

impl OutboxStore for InMemoryOutboxStore {
    type Tx<'a> = InMemoryTransaction<'a>;

    fn begin(&self) -> StoreResult<InMemoryTransaction<'_>> {
        Ok(InMemoryTransaction {
            store: &self.inner,
            inserts: Vec::new(),
            transitions: Vec::new(),
        })
    }

    fn load_by_status(&self, status: OutboxStatus) -> StoreResult<Vec<OutboxRecord>> {
        let rows = self
            .inner
            .rows
            .read()
            .map_err(|_| StoreError::Poisoned("outbox rows"))?;
        Ok(rows
            .values()
            .filter(|record| record.status == status)
            .cloned()
            .collect())
    }

    fn find(&self, id: OutboxId) -> StoreResult<Option<OutboxRecord>> {
        let rows = self
            .inner
            .rows
            .read()
            .map_err(|_| StoreError::Poisoned("outbox rows"))?;
        Ok(rows.get(&id).cloned())
    }
}

/// Buffered writes against an `InMemoryOutboxStore`.
pub struct InMemoryTransaction<'a> {
    store: &'a Inner,
    inserts: Vec<OutboxRecord>,
    transitions: Vec<(OutboxId, OutboxStatus)>,
}

impl InMemoryTransaction<'_> {
    fn stage_transition(&mut self, ids: &[OutboxId], to: OutboxStatus) -> StoreResult<usize> {
        let rows = self
            .store
            .rows
            .read()
            .map_err(|_| StoreError::Poisoned("outbox rows"))?;
        let mut affected = 0;
        for id in ids {
            let pending_here = self
                .inserts
                .iter()
                .any(|record| record.id == *id && record.is_pending());
            let pending_committed = rows.get(id).is_some_and(OutboxRecord::is_pending);
            if pending_here || pending_committed {
                affected += 1;
            }
            self.transitions.push((*id, to));
        }
        Ok(affected)
    }
}

impl OutboxTransaction for InMemoryTransaction<'_> {
    fn insert(&mut self, record: NewOutboxRecord) -> StoreResult<OutboxId> {
        let id = OutboxId(self.store.next_id.fetch_add(1, Ordering::SeqCst));
        self.inserts.push(OutboxRecord {
            id,
            destination: record.destination,
            routing_key: record.routing_key,
            payload: record.payload,
            status: OutboxStatus::Pending,
            created_at: self.store.clock.now(),
        });
        Ok(id)
    }

    fn mark_sent(&mut self, ids: &[OutboxId]) -> StoreResult<usize> {
        self.stage_transition(ids, OutboxStatus::Sent)
    }

    fn mark_failed(&mut self, ids: &[OutboxId]) -> StoreResult<usize> {
        self.stage_transition(ids, OutboxStatus::Failed)
    }

    fn commit(self) -> StoreResult<()> {
        let mut rows = self
            .store
            .rows
            .write()
            .map_err(|_| StoreError::Poisoned("outbox rows"))?;
        for record in self.inserts {
            rows.insert(record.id, record);
        }
        // Transitions only ever leave Pending, so Sent and Failed stay put.
        for (id, to) in self.transitions {
            if let Some(record) = rows.get_mut(&id) {
                if record.is_pending() {
                    record.status = to;
                }
            }
        }
        Ok(())
    }

    fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}
