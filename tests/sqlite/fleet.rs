//! Relays in separate "processes" (separate connections) sharing one file.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use outbox_relay::{
    FleetLock, HoldBounds, InMemoryBroker, OutboxRelay, OutboxStore, OutboxTransaction,
    OutboxWriter, RelayThread, SqliteDatabase, SqliteFleetLock, SqliteOutboxStore,
};

fn member(path: &std::path::Path, broker: &InMemoryBroker) -> RelayThread {
    let db = SqliteDatabase::open(path).unwrap();
    let relay = OutboxRelay::new(
        SqliteOutboxStore::new(db.clone()),
        SqliteFleetLock::new(db),
        broker.clone(),
    )
    .with_hold_bounds(HoldBounds::new(Duration::ZERO, Duration::from_secs(30)).unwrap());
    RelayThread::spawn(Arc::new(relay), Duration::from_millis(5))
}

#[test]
fn fleet_members_share_the_work_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleet.db");
    let producer = SqliteOutboxStore::new(SqliteDatabase::open(&path).unwrap());
    let broker = InMemoryBroker::with_destinations(["orders"]);

    let members = vec![member(&path, &broker), member(&path, &broker)];

    let writer = OutboxWriter::default();
    for n in 0..60 {
        let mut tx = producer.begin().unwrap();
        writer
            .append_raw(&mut tx, "orders", &format!("order.{n}"), "{}")
            .unwrap();
        tx.commit().unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(15);
    while !producer.load_pending().unwrap().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    let published: usize = members.into_iter().map(|m| m.stop().records_published).sum();

    let deliveries = broker.deliveries();
    let keys: HashSet<&str> = deliveries.iter().map(|d| d.routing_key.as_str()).collect();
    assert!(producer.load_pending().unwrap().is_empty());
    assert_eq!(deliveries.len(), 60);
    assert_eq!(keys.len(), 60);
    assert_eq!(published, 60);
}

#[test]
fn lock_row_is_visible_to_other_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleet.db");
    let holder = SqliteFleetLock::new(SqliteDatabase::open(&path).unwrap());
    let db = SqliteDatabase::open(&path).unwrap();
    let bounds = HoldBounds::new(Duration::ZERO, Duration::from_secs(30)).unwrap();

    let handle = holder.acquire("outbox-relay", bounds).unwrap().unwrap();

    let locked_by: String = db
        .with_connection(|conn| {
            conn.query_row(
                "SELECT locked_by FROM fleet_locks WHERE name = 'outbox-relay'",
                [],
                |row| row.get(0),
            )
        })
        .unwrap();
    assert_eq!(locked_by, handle.holder());

    let relay = OutboxRelay::new(
        SqliteOutboxStore::new(db.clone()),
        SqliteFleetLock::new(db),
        InMemoryBroker::new(),
    );
    assert!(matches!(
        relay.run().unwrap(),
        outbox_relay::RunReport::Skipped(outbox_relay::SkipReason::LockHeld)
    ));
}
