//! Broker topology readiness check.
//!
//! The relay is only useful once the broker has every destination it will
//! publish to. `BrokerTopologyProbe` asks the channel about each required
//! destination and reports which ones are missing.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::delivery::{BoundedChannel, DeliveryChannel};

/// Readiness result, serialized as `{"status":"UP"}` or
/// `{"status":"DOWN","missing":[...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum TopologyHealth {
    Up,
    Down { missing: Vec<String> },
}

impl TopologyHealth {
    pub fn is_up(&self) -> bool {
        matches!(self, TopologyHealth::Up)
    }

    pub fn missing(&self) -> &[String] {
        match self {
            TopologyHealth::Up => &[],
            TopologyHealth::Down { missing } => missing,
        }
    }
}

pub struct BrokerTopologyProbe<C: ?Sized> {
    channel: Arc<C>,
    required: Vec<String>,
}

impl<C: DeliveryChannel + ?Sized> BrokerTopologyProbe<C> {
    /// Check `required` through `channel` as given. Each `exists` call
    /// blocks for as long as the channel does; wrap it in a `BoundedChannel`
    /// (or use `from_config`) if it can hang.
    pub fn new<I, D>(channel: Arc<C>, required: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<String>,
    {
        Self {
            channel,
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Check every required destination, in configured order.
    ///
    /// A destination whose existence check errors counts as missing.
    pub fn check(&self) -> TopologyHealth {
        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|destination| !self.present(destination))
            .cloned()
            .collect();

        if missing.is_empty() {
            debug!(destinations = self.required.len(), "broker topology ready");
            TopologyHealth::Up
        } else {
            warn!(?missing, "broker topology incomplete");
            TopologyHealth::Down { missing }
        }
    }

    fn present(&self, destination: &str) -> bool {
        match self.channel.exists(destination) {
            Ok(exists) => exists,
            Err(err) => {
                warn!(destination, error = %err, "could not check destination, treating it as missing");
                false
            }
        }
    }
}

impl<C: DeliveryChannel + 'static> BrokerTopologyProbe<BoundedChannel<C>> {
    /// Check `required-destinations`, giving each `exists` call at most
    /// `publish-timeout`.
    pub fn from_config(channel: Arc<C>, config: &RelayConfig) -> Self {
        Self::new(
            Arc::new(BoundedChannel::from_arc(channel, config.publish_timeout)),
            config.required_destinations.clone(),
        )
    }
}
