//! Fleet lock exclusion: two relays sharing a lock table never run together.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use std::sync::atomic::AtomicUsize;

use outbox_relay::{
    FleetLock, HoldBounds, InMemoryBroker, InMemoryFleetLock, InMemoryOutboxStore, ManualClock,
    OutboxRelay, OutboxStatus, OutboxStore, RunReport, RunStats, SkipReason,
};

use crate::support::{seed, status_of, GatedBroker, SlowBroker};

fn bounds(min_secs: u64, max_secs: u64) -> HoldBounds {
    HoldBounds::new(Duration::from_secs(min_secs), Duration::from_secs(max_secs)).unwrap()
}

#[test]
fn second_member_skips_while_first_is_publishing() {
    let store = InMemoryOutboxStore::new();
    let lock = InMemoryFleetLock::new();
    let gate = Arc::new(GatedBroker::new(InMemoryBroker::with_destinations(["orders"])));
    seed(&store, "orders", "order.created", "{}");

    let first = Arc::new(
        OutboxRelay::new(store.clone(), lock.clone(), Arc::clone(&gate))
            .with_hold_bounds(bounds(0, 60)),
    );
    let second = OutboxRelay::new(store.clone(), lock.clone(), Arc::clone(&gate))
        .with_hold_bounds(bounds(0, 60));

    let running = {
        let first = Arc::clone(&first);
        thread::spawn(move || first.run())
    };
    gate.entered();

    assert_eq!(
        second.run().unwrap(),
        RunReport::Skipped(SkipReason::LockHeld)
    );

    gate.proceed();
    let report = running.join().unwrap().unwrap();
    assert_eq!(report.stats().map(|s| s.published), Some(1));
    assert_eq!(gate.broker.deliveries().len(), 1);

    // Lock released with no minimum hold: the second member may run now.
    assert_eq!(second.run().unwrap(), RunReport::Idle);
}

#[test]
fn same_instance_does_not_overlap_itself() {
    let store = InMemoryOutboxStore::new();
    let gate = Arc::new(GatedBroker::new(InMemoryBroker::with_destinations(["orders"])));
    seed(&store, "orders", "order.created", "{}");

    let relay = Arc::new(OutboxRelay::new(store, InMemoryFleetLock::new(), Arc::clone(&gate)));

    let running = {
        let relay = Arc::clone(&relay);
        thread::spawn(move || relay.run())
    };
    gate.entered();

    assert_eq!(
        relay.run().unwrap(),
        RunReport::Skipped(SkipReason::AlreadyRunning)
    );

    gate.proceed();
    assert!(matches!(
        running.join().unwrap().unwrap(),
        RunReport::Completed(_)
    ));
}

#[test]
fn minimum_hold_spaces_out_runs_across_the_fleet() {
    let clock = ManualClock::default();
    let store = InMemoryOutboxStore::new();
    let lock = InMemoryFleetLock::with_clock(clock.clone());
    let broker = InMemoryBroker::with_destinations(["orders"]);

    let a = OutboxRelay::new(store.clone(), lock.clone(), broker.clone())
        .with_hold_bounds(bounds(5, 60));
    let b = OutboxRelay::new(store.clone(), lock.clone(), broker.clone())
        .with_hold_bounds(bounds(5, 60));

    assert_eq!(a.run().unwrap(), RunReport::Idle);
    assert_eq!(b.run().unwrap(), RunReport::Skipped(SkipReason::LockHeld));

    clock.advance(Duration::from_secs(5));
    assert_eq!(b.run().unwrap(), RunReport::Idle);
}

#[test]
fn crashed_holder_is_superseded_after_maximum_hold() {
    let clock = ManualClock::default();
    let store = InMemoryOutboxStore::new();
    let lock = InMemoryFleetLock::with_clock(clock.clone());
    let broker = InMemoryBroker::with_destinations(["orders"]);
    seed(&store, "orders", "order.created", "{}");

    // A member that took the lock and died without releasing.
    let _orphan = lock
        .acquire("outbox-relay", bounds(5, 60))
        .unwrap()
        .unwrap();

    let relay = OutboxRelay::new(store, lock, broker.clone()).with_hold_bounds(bounds(5, 60));
    assert_eq!(relay.run().unwrap(), RunReport::Skipped(SkipReason::LockHeld));

    clock.advance(Duration::from_secs(60));
    assert!(matches!(relay.run().unwrap(), RunReport::Completed(_)));
    assert_eq!(broker.deliveries().len(), 1);
}

#[test]
fn run_stops_publishing_before_the_maximum_hold_runs_out() {
    let clock = ManualClock::default();
    let store = InMemoryOutboxStore::new();
    let lock = InMemoryFleetLock::with_clock(clock.clone());
    let slow = Arc::new(SlowBroker {
        broker: InMemoryBroker::with_destinations(["orders"]),
        clock: clock.clone(),
        step: Duration::from_secs(20),
        lock: lock.clone(),
        job_name: "outbox-relay".to_string(),
        rival_acquired: AtomicUsize::new(0),
    });
    let ids: Vec<_> = (0..5)
        .map(|n| seed(&store, "orders", &format!("order.{n}"), "{}"))
        .collect();

    let first = OutboxRelay::new(store.clone(), lock.clone(), Arc::clone(&slow))
        .with_hold_bounds(bounds(0, 60))
        .with_publish_timeout(Duration::from_secs(5))
        .with_clock(clock.clone());

    // Publishes start at 0s, 20s and 40s. At 60s a 5s call could end after
    // the hold, so the last two wait for the next holder.
    assert_eq!(
        first.run().unwrap(),
        RunReport::Completed(RunStats {
            published: 3,
            failed: 0,
            marked_sent: 3,
            deferred: 2,
        })
    );
    assert_eq!(slow.rival_acquired(), 0);
    assert_eq!(status_of(&store, ids[2]), OutboxStatus::Sent);
    assert_eq!(status_of(&store, ids[3]), OutboxStatus::Pending);
    assert_eq!(store.load_pending().unwrap().len(), 2);

    let second = OutboxRelay::new(store.clone(), lock, Arc::clone(&slow))
        .with_hold_bounds(bounds(0, 60))
        .with_publish_timeout(Duration::from_secs(5))
        .with_clock(clock);
    assert_eq!(second.run().unwrap().stats().map(|s| s.published), Some(2));

    let delivered: Vec<_> = slow
        .broker
        .deliveries()
        .into_iter()
        .map(|d| d.routing_key)
        .collect();
    assert_eq!(
        delivered,
        vec!["order.0", "order.1", "order.2", "order.3", "order.4"]
    );
    assert_eq!(slow.rival_acquired(), 0);
}

#[test]
fn different_job_names_do_not_exclude_each_other() {
    let store = InMemoryOutboxStore::new();
    let lock = InMemoryFleetLock::new();
    let broker = InMemoryBroker::with_destinations(["orders"]);

    let _held = lock
        .acquire("outbox-relay", bounds(0, 60))
        .unwrap()
        .unwrap();

    let relay = OutboxRelay::new(store, lock, broker).with_job_name("billing-outbox-relay");
    assert_eq!(relay.run().unwrap(), RunReport::Idle);
}
