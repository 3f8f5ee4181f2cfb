use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, warn};

use super::{NewOutboxRecord, OutboxId, OutboxTransaction, StoreResult};
use crate::config::RelayConfig;

/// Appends events to the outbox from inside a caller's business transaction.
///
/// The writer only touches the store, never the broker, so it cannot block on
/// network I/O. The row becomes visible to the relay when the caller commits;
/// if the caller rolls back, the event goes with it.
///
/// ```
/// use outbox_relay::{InMemoryOutboxStore, OutboxStore, OutboxTransaction, OutboxWriter};
///
/// let store = InMemoryOutboxStore::new();
/// let writer = OutboxWriter::new(true);
///
/// let mut tx = store.begin().unwrap();
/// // ... business writes on the same transaction ...
/// writer
///     .append(&mut tx, "comicbook.exchange", "comicbook.created", &serde_json::json!({ "id": "42" }))
///     .unwrap();
/// tx.commit().unwrap();
///
/// assert_eq!(store.load_pending().unwrap().len(), 1);
/// ```
#[derive(Debug)]
pub struct OutboxWriter {
    enabled: AtomicBool,
}

impl Default for OutboxWriter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl OutboxWriter {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Writer honoring the configured `enabled` flag.
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.enabled)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Toggle event emission. While disabled every append is a no-op.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Serialize `payload` to JSON and append a `Pending` record.
    ///
    /// Returns `Ok(None)` when the writer is disabled or the payload cannot be
    /// serialized. A serialization failure is logged and the event dropped; it
    /// never fails the caller's transaction. Store errors are returned, since
    /// they mean the caller's transaction itself is in trouble.
    pub fn append<T, P>(
        &self,
        tx: &mut T,
        destination: &str,
        routing_key: &str,
        payload: &P,
    ) -> StoreResult<Option<OutboxId>>
    where
        T: OutboxTransaction + ?Sized,
        P: Serialize + ?Sized,
    {
        if !self.is_enabled() {
            debug!(destination, routing_key, "outbox writer disabled, event not recorded");
            return Ok(None);
        }

        let payload = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(err) => {
                warn!(
                    destination,
                    routing_key,
                    error = %err,
                    "could not serialize outbox payload, event dropped"
                );
                return Ok(None);
            }
        };

        self.insert(tx, destination, routing_key, payload).map(Some)
    }

    /// Append an already-serialized payload.
    pub fn append_raw<T>(
        &self,
        tx: &mut T,
        destination: &str,
        routing_key: &str,
        payload: impl Into<String>,
    ) -> StoreResult<Option<OutboxId>>
    where
        T: OutboxTransaction + ?Sized,
    {
        if !self.is_enabled() {
            debug!(destination, routing_key, "outbox writer disabled, event not recorded");
            return Ok(None);
        }
        self.insert(tx, destination, routing_key, payload.into())
            .map(Some)
    }

    fn insert<T>(
        &self,
        tx: &mut T,
        destination: &str,
        routing_key: &str,
        payload: String,
    ) -> StoreResult<OutboxId>
    where
        T: OutboxTransaction + ?Sized,
    {
        let id = tx.insert(NewOutboxRecord::new(destination, routing_key, payload))?;
        debug!(record_id = %id, destination, routing_key, "outbox record appended");
        Ok(id)
    }
}
