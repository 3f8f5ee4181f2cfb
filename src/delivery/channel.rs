use std::time::Duration;

use thiserror::Error;

/// Error type for broker calls.
///
/// Every variant is treated the same way by the relay: the record stays
/// `Pending` and is retried on the next run.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker refused the message.
    #[error("message rejected: {0}")]
    Rejected(String),

    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    #[error("broker call timed out after {0:?}")]
    Timeout(Duration),

    #[error("publish error: {0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// The broker, as the relay and the topology probe see it.
///
/// Implementations might wrap an AMQP channel, a Kafka producer, a NATS
/// client or an HTTP webhook. They must be safe to call from a background
/// thread.
pub trait DeliveryChannel: Send + Sync {
    /// Deliver one message. `Ok` means the broker accepted it.
    fn publish(&self, destination: &str, routing_key: &str, payload: &str)
        -> Result<(), PublishError>;

    /// Admin query: does the destination exist on the broker?
    fn exists(&self, destination: &str) -> Result<bool, PublishError>;
}

impl<C: DeliveryChannel + ?Sized> DeliveryChannel for std::sync::Arc<C> {
    fn publish(
        &self,
        destination: &str,
        routing_key: &str,
        payload: &str,
    ) -> Result<(), PublishError> {
        (**self).publish(destination, routing_key, payload)
    }

    fn exists(&self, destination: &str) -> Result<bool, PublishError> {
        (**self).exists(destination)
    }
}
