//! Relay configuration.
//!
//! Loaded from a JSON file with kebab-case keys, then overridden from
//! `OUTBOX_RELAY_*` environment variables. Durations are humantime strings
//! such as `"30s"`, `"5m"` or `"500ms"`.
//!
//! ```json
//! {
//!   "enabled": true,
//!   "fixed-delay": "10s",
//!   "lock-at-least-for": "5s",
//!   "lock-at-most-for": "1m",
//!   "publish-timeout": "5s",
//!   "job-name": "outbox-relay",
//!   "required-destinations": ["orders", "payments"]
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lock::HoldBounds;
use crate::relay::DEFAULT_JOB_NAME;

pub const ENV_ENABLED: &str = "OUTBOX_RELAY_ENABLED";
pub const ENV_FIXED_DELAY: &str = "OUTBOX_RELAY_FIXED_DELAY";
pub const ENV_LOCK_AT_LEAST_FOR: &str = "OUTBOX_RELAY_LOCK_AT_LEAST_FOR";
pub const ENV_LOCK_AT_MOST_FOR: &str = "OUTBOX_RELAY_LOCK_AT_MOST_FOR";
pub const ENV_PUBLISH_TIMEOUT: &str = "OUTBOX_RELAY_PUBLISH_TIMEOUT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{key}: invalid duration {value:?}: {reason}")]
    InvalidDuration {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{key}: invalid boolean {value:?}")]
    InvalidBool { key: String, value: String },

    #[error("lock-at-least-for ({min:?}) exceeds lock-at-most-for ({max:?})")]
    InvalidBounds { min: Duration, max: Duration },

    #[error("publish-timeout ({timeout:?}) must be shorter than lock-at-most-for ({max:?})")]
    TimeoutExceedsHold { timeout: Duration, max: Duration },

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RelayConfig {
    /// Whether `OutboxWriter` records anything.
    pub enabled: bool,
    /// Pause between the end of one run and the start of the next.
    #[serde(with = "humantime_serde")]
    pub fixed_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub lock_at_least_for: Duration,
    #[serde(with = "humantime_serde")]
    pub lock_at_most_for: Duration,
    #[serde(with = "humantime_serde")]
    pub publish_timeout: Duration,
    pub job_name: String,
    /// Destinations the readiness probe checks for.
    pub required_destinations: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fixed_delay: Duration::from_secs(10),
            lock_at_least_for: Duration::from_secs(5),
            lock_at_most_for: Duration::from_secs(60),
            publish_timeout: Duration::from_secs(5),
            job_name: DEFAULT_JOB_NAME.to_string(),
            required_destinations: Vec::new(),
        }
    }
}

impl RelayConfig {
    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Apply overrides from the process environment.
    pub fn load_from_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. `load_from_env` uses the process
    /// environment.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_ENABLED) {
            self.enabled = parse_bool(ENV_ENABLED, &value)?;
        }
        if let Some(value) = lookup(ENV_FIXED_DELAY) {
            self.fixed_delay = parse_duration(ENV_FIXED_DELAY, &value)?;
        }
        if let Some(value) = lookup(ENV_LOCK_AT_LEAST_FOR) {
            self.lock_at_least_for = parse_duration(ENV_LOCK_AT_LEAST_FOR, &value)?;
        }
        if let Some(value) = lookup(ENV_LOCK_AT_MOST_FOR) {
            self.lock_at_most_for = parse_duration(ENV_LOCK_AT_MOST_FOR, &value)?;
        }
        if let Some(value) = lookup(ENV_PUBLISH_TIMEOUT) {
            self.publish_timeout = parse_duration(ENV_PUBLISH_TIMEOUT, &value)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fixed_delay.is_zero() {
            return Err(ConfigError::ZeroDuration("fixed-delay"));
        }
        if self.publish_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("publish-timeout"));
        }
        if self.lock_at_most_for.is_zero() {
            return Err(ConfigError::ZeroDuration("lock-at-most-for"));
        }
        if self.lock_at_least_for > self.lock_at_most_for {
            return Err(ConfigError::InvalidBounds {
                min: self.lock_at_least_for,
                max: self.lock_at_most_for,
            });
        }
        // A publish that starts inside the hold must also end inside it.
        if self.publish_timeout >= self.lock_at_most_for {
            return Err(ConfigError::TimeoutExceedsHold {
                timeout: self.publish_timeout,
                max: self.lock_at_most_for,
            });
        }
        Ok(())
    }

    pub fn hold_bounds(&self) -> Result<HoldBounds, ConfigError> {
        HoldBounds::new(self.lock_at_least_for, self.lock_at_most_for).map_err(|_| {
            ConfigError::InvalidBounds {
                min: self.lock_at_least_for,
                max: self.lock_at_most_for,
            }
        })
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|e| ConfigError::InvalidDuration {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Serde adapter for humantime duration strings.
mod humantime_serde {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(de::Error::custom)
    }
}
