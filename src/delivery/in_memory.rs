//! In-memory broker for testing and single-process scenarios.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use super::{DeliveryChannel, PublishError};

/// A message accepted by the in-memory broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub destination: String,
    pub routing_key: String,
    pub payload: String,
}

/// In-memory broker.
///
/// Features:
/// - Thread-safe; clones share the same state
/// - Destinations must be declared before they accept messages, the way an
///   exchange must exist before an AMQP publish succeeds
/// - Routing keys can be scripted to be rejected, to exercise failure paths
/// - Every accepted message is kept in an append-only log
///
/// ```
/// use outbox_relay::delivery::{DeliveryChannel, InMemoryBroker};
///
/// let broker = InMemoryBroker::with_destinations(["orders"]);
/// broker.publish("orders", "order.created", r#"{"id":1}"#).unwrap();
/// assert!(broker.publish("payments", "payment.settled", "{}").is_err());
/// assert_eq!(broker.deliveries().len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    destinations: Arc<RwLock<HashSet<String>>>,
    rejected_keys: Arc<RwLock<HashSet<String>>>,
    log: Arc<Mutex<Vec<Delivery>>>,
    attempts: Arc<Mutex<HashMap<String, usize>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_destinations<I, S>(destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let broker = Self::new();
        for destination in destinations {
            broker.declare(destination);
        }
        broker
    }

    pub fn declare(&self, destination: impl Into<String>) {
        if let Ok(mut destinations) = self.destinations.write() {
            destinations.insert(destination.into());
        }
    }

    /// Remove a destination; later publishes to it fail.
    pub fn delete(&self, destination: &str) {
        if let Ok(mut destinations) = self.destinations.write() {
            destinations.remove(destination);
        }
    }

    /// Reject every message with this routing key until `accept` is called.
    pub fn reject(&self, routing_key: impl Into<String>) {
        if let Ok(mut keys) = self.rejected_keys.write() {
            keys.insert(routing_key.into());
        }
    }

    pub fn accept(&self, routing_key: &str) {
        if let Ok(mut keys) = self.rejected_keys.write() {
            keys.remove(routing_key);
        }
    }

    /// Accepted messages, in publish order.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn deliveries_to(&self, destination: &str) -> Vec<Delivery> {
        self.deliveries()
            .into_iter()
            .filter(|d| d.destination == destination)
            .collect()
    }

    /// Publish calls made for a routing key, accepted or not.
    pub fn attempts(&self, routing_key: &str) -> usize {
        self.attempts
            .lock()
            .map(|attempts| attempts.get(routing_key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Publish calls made, accepted or not.
    pub fn total_attempts(&self) -> usize {
        self.attempts
            .lock()
            .map(|attempts| attempts.values().sum())
            .unwrap_or(0)
    }
}

impl DeliveryChannel for InMemoryBroker {
    fn publish(
        &self,
        destination: &str,
        routing_key: &str,
        payload: &str,
    ) -> Result<(), PublishError> {
        {
            let mut attempts = self
                .attempts
                .lock()
                .map_err(|_| PublishError::ConnectionFailed("broker state poisoned".into()))?;
            *attempts.entry(routing_key.to_string()).or_default() += 1;
        }

        if !self.exists(destination)? {
            return Err(PublishError::UnknownDestination(destination.to_string()));
        }

        let rejected = self
            .rejected_keys
            .read()
            .map_err(|_| PublishError::ConnectionFailed("broker state poisoned".into()))?
            .contains(routing_key);
        if rejected {
            return Err(PublishError::Rejected(format!(
                "routing key '{routing_key}' refused by broker"
            )));
        }

        let mut log = self
            .log
            .lock()
            .map_err(|_| PublishError::ConnectionFailed("broker state poisoned".into()))?;
        log.push(Delivery {
            destination: destination.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    fn exists(&self, destination: &str) -> Result<bool, PublishError> {
        let destinations = self
            .destinations
            .read()
            .map_err(|_| PublishError::ConnectionFailed("broker state poisoned".into()))?;
        Ok(destinations.contains(destination))
    }
}
