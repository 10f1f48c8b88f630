//! Client and receiver configuration.
//!
//! Both configs implement serde so they can be embedded in an application's
//! own settings file. Durations are written as integer milliseconds under
//! `*_ms` keys:
//!
//! ```yaml
//! connect_timeout_ms: 2000
//! write_timeout_ms: 500
//! connect_retries: 3
//! batching:
//!   max_entries: 128
//!   max_delay_ms: 20
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Result, StreamError};

/// Settings for a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Bound on each TCP connect attempt.
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Bound on each frame write.
    #[serde(rename = "write_timeout_ms", with = "duration_ms")]
    pub write_timeout: Duration,

    /// Extra connect attempts after the first failure.
    pub connect_retries: u32,

    /// Base delay between connect attempts, doubled after each one.
    #[serde(rename = "retry_backoff_ms", with = "duration_ms")]
    pub retry_backoff: Duration,

    /// Set `TCP_NODELAY` on the socket.
    pub nodelay: bool,

    /// Send the protocol preamble right after connecting.
    pub handshake: bool,

    /// Coalesce single samples per channel when set.
    pub batching: Option<BatchConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            connect_retries: 0,
            retry_backoff: Duration::from_millis(50),
            nodelay: true,
            handshake: false,
            batching: None,
        }
    }
}

impl ClientConfig {
    /// Parse a config from YAML, rejecting unknown keys.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_connect_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.connect_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_handshake(mut self, handshake: bool) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_batching(mut self, batching: BatchConfig) -> Self {
        self.batching = Some(batching);
        self
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(StreamError::invalid_argument("connect_timeout must be greater than zero"));
        }
        if self.write_timeout.is_zero() {
            return Err(StreamError::invalid_argument("write_timeout must be greater than zero"));
        }
        if let Some(batching) = &self.batching {
            batching.validate()?;
        }
        Ok(())
    }

    /// Delay before connect attempt `attempt` (1-based retry count).
    ///
    /// Doubles per attempt and stops growing after the fifth doubling.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(5);
        self.retry_backoff.saturating_mul(1 << exponent)
    }
}

/// Thresholds for the batch accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Flush a channel once this many samples are pending.
    pub max_entries: usize,

    /// Flush a channel once its oldest pending sample is this old.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_entries: 256, max_delay: Duration::from_millis(50) }
    }
}

impl BatchConfig {
    pub fn new(max_entries: usize, max_delay: Duration) -> Self {
        Self { max_entries, max_delay }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(StreamError::invalid_argument("batching.max_entries must be at least 1"));
        }
        if self.max_delay.is_zero() {
            return Err(StreamError::invalid_argument("batching.max_delay must be greater than zero"));
        }
        Ok(())
    }
}

/// Settings for a [`Receiver`](crate::receiver::Receiver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReceiverConfig {
    /// Address to listen on. Port 0 picks an ephemeral port.
    pub bind: String,

    /// Largest frame a peer may send before it is disconnected.
    pub max_frame_len: usize,

    /// Capacity of the channel delivering decoded messages.
    pub channel_capacity: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:12345".to_string(),
            max_frame_len: crate::codec::DEFAULT_MAX_FRAME_LEN,
            channel_capacity: 1024,
        }
    }
}

impl ReceiverConfig {
    pub fn new(bind: impl Into<String>) -> Self {
        Self { bind: bind.into(), ..Self::default() }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bind.is_empty() {
            return Err(StreamError::invalid_argument("bind address must not be empty"));
        }
        if self.max_frame_len == 0 {
            return Err(StreamError::invalid_argument("max_frame_len must be at least 1"));
        }
        if self.channel_capacity == 0 {
            return Err(StreamError::invalid_argument("channel_capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Serde adapter for durations stored as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
