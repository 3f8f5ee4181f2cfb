//! Test doubles for the relay suites.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use outbox_relay::{
    DeliveryChannel, FleetLock, HoldBounds, InMemoryBroker, InMemoryFleetLock,
    InMemoryOutboxStore, InMemoryTransaction, ManualClock, NewOutboxRecord, OutboxId,
    OutboxRecord, OutboxStatus, OutboxStore, OutboxTransaction, PublishError, StoreResult,
};

/// Commit one pending record and return its id.
pub fn seed(store: &impl OutboxStore, destination: &str, routing_key: &str, payload: &str) -> OutboxId {
    let mut tx = store.begin().unwrap();
    let id = tx
        .insert(NewOutboxRecord::new(destination, routing_key, payload))
        .unwrap();
    tx.commit().unwrap();
    id
}

pub fn status_of(store: &impl OutboxStore, id: OutboxId) -> OutboxStatus {
    store.find(id).unwrap().unwrap().status
}

/// Counts the transactions and reads the relay makes against a store.
#[derive(Default)]
pub struct CountingStore {
    pub inner: InMemoryOutboxStore,
    begins: AtomicUsize,
    loads: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: InMemoryOutboxStore) -> Self {
        Self {
            inner,
            begins: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl OutboxStore for CountingStore {
    type Tx<'a> = InMemoryTransaction<'a>;

    fn begin(&self) -> StoreResult<InMemoryTransaction<'_>> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        self.inner.begin()
    }

    fn load_by_status(&self, status: OutboxStatus) -> StoreResult<Vec<OutboxRecord>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load_by_status(status)
    }

    fn find(&self, id: OutboxId) -> StoreResult<Option<OutboxRecord>> {
        self.inner.find(id)
    }
}

/// A broker that parks every publish until the test lets it through.
///
/// `entered()` yields once per publish that has reached the broker;
/// `proceed()` lets one parked publish continue.
pub struct GatedBroker {
    pub broker: InMemoryBroker,
    entered_tx: Mutex<Sender<()>>,
    entered_rx: Mutex<Receiver<()>>,
    proceed_tx: Mutex<Sender<()>>,
    proceed_rx: Mutex<Receiver<()>>,
}

impl GatedBroker {
    pub fn new(broker: InMemoryBroker) -> Self {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (proceed_tx, proceed_rx) = mpsc::channel();
        Self {
            broker,
            entered_tx: Mutex::new(entered_tx),
            entered_rx: Mutex::new(entered_rx),
            proceed_tx: Mutex::new(proceed_tx),
            proceed_rx: Mutex::new(proceed_rx),
        }
    }

    /// Wait until a publish is parked at the gate.
    pub fn entered(&self) {
        self.entered_rx
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(5))
            .expect("no publish reached the broker");
    }

    pub fn proceed(&self) {
        self.proceed_tx.lock().unwrap().send(()).unwrap();
    }
}

impl DeliveryChannel for GatedBroker {
    fn publish(&self, destination: &str, routing_key: &str, payload: &str) -> Result<(), PublishError> {
        let _ = self.entered_tx.lock().unwrap().send(());
        self.proceed_rx
            .lock()
            .unwrap()
            .recv()
            .map_err(|_| PublishError::ConnectionFailed("gate closed".into()))?;
        self.broker.publish(destination, routing_key, payload)
    }

    fn exists(&self, destination: &str) -> Result<bool, PublishError> {
        self.broker.exists(destination)
    }
}

/// A broker that hangs on one destination.
pub struct HangingBroker {
    pub broker: InMemoryBroker,
    pub hang_on: String,
    pub hang_for: Duration,
}

impl DeliveryChannel for HangingBroker {
    fn publish(&self, destination: &str, routing_key: &str, payload: &str) -> Result<(), PublishError> {
        if destination == self.hang_on {
            thread::sleep(self.hang_for);
        }
        self.broker.publish(destination, routing_key, payload)
    }

    fn exists(&self, destination: &str) -> Result<bool, PublishError> {
        self.broker.exists(destination)
    }
}

/// A broker where every publish takes `step` of manual-clock time.
///
/// Before each publish it tries to take `job_name` the way another fleet
/// member would and counts how often that succeeds.
pub struct SlowBroker {
    pub broker: InMemoryBroker,
    pub clock: ManualClock,
    pub step: Duration,
    pub lock: InMemoryFleetLock,
    pub job_name: String,
    pub rival_acquired: AtomicUsize,
}

impl SlowBroker {
    pub fn rival_acquired(&self) -> usize {
        self.rival_acquired.load(Ordering::SeqCst)
    }
}

impl DeliveryChannel for SlowBroker {
    fn publish(&self, destination: &str, routing_key: &str, payload: &str) -> Result<(), PublishError> {
        let bounds = HoldBounds::new(Duration::ZERO, Duration::from_secs(60)).unwrap();
        if let Some(handle) = self.lock.acquire(&self.job_name, bounds).unwrap() {
            self.rival_acquired.fetch_add(1, Ordering::SeqCst);
            self.lock.release(handle).unwrap();
        }
        self.clock.advance(self.step);
        self.broker.publish(destination, routing_key, payload)
    }

    fn exists(&self, destination: &str) -> Result<bool, PublishError> {
        self.broker.exists(destination)
    }
}
