//! Records appended by the writer are visible to the relay only once the
//! enclosing transaction commits.

use serde::Serialize;

use outbox_relay::{
    InMemoryBroker, InMemoryFleetLock, InMemoryOutboxStore, OutboxRelay, OutboxStore,
    OutboxTransaction, OutboxWriter, RunReport,
};

#[derive(Serialize)]
struct OrderCreated {
    order_id: String,
    total_cents: u64,
}

fn order(id: &str) -> OrderCreated {
    OrderCreated {
        order_id: id.to_string(),
        total_cents: 4_200,
    }
}

#[test]
fn committed_event_is_relayed_with_its_json_payload() {
    let store = InMemoryOutboxStore::new();
    let broker = InMemoryBroker::with_destinations(["orders"]);
    let writer = OutboxWriter::default();

    let mut tx = store.begin().unwrap();
    writer
        .append(&mut tx, "orders", "order.created", &order("o-1"))
        .unwrap();
    tx.commit().unwrap();

    OutboxRelay::new(store, InMemoryFleetLock::new(), broker.clone())
        .run()
        .unwrap();

    let delivered = broker.deliveries_to("orders");
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].routing_key, "order.created");
    let payload: serde_json::Value = serde_json::from_str(&delivered[0].payload).unwrap();
    assert_eq!(payload["order_id"], "o-1");
    assert_eq!(payload["total_cents"], 4_200);
}

#[test]
fn rolled_back_event_is_never_relayed() {
    let store = InMemoryOutboxStore::new();
    let broker = InMemoryBroker::with_destinations(["orders"]);
    let writer = OutboxWriter::default();

    let mut tx = store.begin().unwrap();
    writer
        .append(&mut tx, "orders", "order.created", &order("o-1"))
        .unwrap();
    tx.rollback().unwrap();

    let mut tx = store.begin().unwrap();
    writer
        .append(&mut tx, "orders", "order.created", &order("o-2"))
        .unwrap();
    drop(tx);

    let relay = OutboxRelay::new(store.clone(), InMemoryFleetLock::new(), broker.clone());
    assert_eq!(relay.run().unwrap(), RunReport::Idle);
    assert!(store.is_empty());
    assert_eq!(broker.total_attempts(), 0);
}

#[test]
fn open_transaction_is_invisible_to_a_concurrent_run() {
    let store = InMemoryOutboxStore::new();
    let broker = InMemoryBroker::with_destinations(["orders"]);
    let writer = OutboxWriter::default();
    let relay = OutboxRelay::new(store.clone(), InMemoryFleetLock::new(), broker.clone());

    let mut tx = store.begin().unwrap();
    writer
        .append(&mut tx, "orders", "order.created", &order("o-1"))
        .unwrap();

    assert_eq!(relay.run().unwrap(), RunReport::Idle);

    tx.commit().unwrap();
    assert!(matches!(relay.run().unwrap(), RunReport::Completed(_)));
    assert_eq!(broker.deliveries().len(), 1);
}

#[test]
fn disabled_writer_records_nothing() {
    let store = InMemoryOutboxStore::new();
    let writer = OutboxWriter::new(false);

    let mut tx = store.begin().unwrap();
    let id = writer
        .append(&mut tx, "orders", "order.created", &order("o-1"))
        .unwrap();
    tx.commit().unwrap();

    assert!(id.is_none());
    assert!(store.is_empty());
}
