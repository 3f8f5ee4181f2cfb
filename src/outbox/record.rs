use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StoreError;

/// Store-assigned, monotonically increasing record id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutboxId(pub i64);

impl fmt::Display for OutboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery status of an outbox record.
///
/// `Sent` is terminal. `Failed` is only ever set by an operator, never by the
/// relay: a failed publish leaves the record `Pending`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    #[default]
    Pending,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "SENT" => Ok(OutboxStatus::Sent),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(StoreError::InvalidData(format!(
                "unknown outbox status '{other}'"
            ))),
        }
    }
}

/// A persisted outbox row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: OutboxId,
    /// Broker-side delivery target (an exchange, topic, stream...).
    pub destination: String,
    /// Sub-address the broker routes on.
    pub routing_key: String,
    /// Pre-serialized payload. Never interpreted by the relay.
    pub payload: String,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    pub fn is_sent(&self) -> bool {
        self.status == OutboxStatus::Sent
    }

    pub fn is_failed(&self) -> bool {
        self.status == OutboxStatus::Failed
    }
}

/// The caller-supplied part of a record; the store fills in id, status and
/// timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOutboxRecord {
    pub destination: String,
    pub routing_key: String,
    pub payload: String,
}

impl NewOutboxRecord {
    pub fn new(
        destination: impl Into<String>,
        routing_key: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            routing_key: routing_key.into(),
            payload: payload.into(),
        }
    }
}
