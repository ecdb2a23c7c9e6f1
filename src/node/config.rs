//! Node configuration
//!
//! ```
//! use meshrelay::MeshConfig;
//! use std::time::Duration;
//!
//! let config = MeshConfig::builder()
//!     .device_id("rescuer-7")
//!     .ack_timeout(Duration::from_secs(30))
//!     .max_retries(3)
//!     .build();
//! assert!(config.validate().is_ok());
//! ```

use crate::delivery::{TrackerConfig, ACK_TIMEOUT, DELIVERED_LOG_CAPACITY, MAX_PENDING_ACKS, MAX_RETRIES};
use crate::ledger::{HISTORY_CAPACITY, SEEN_CAPACITY};
use crate::mailbox::{MailboxConfig, MAX_MAILBOX_SIZE, MESSAGE_EXPIRY};
use crate::node::error::{NodeError, NodeResult};
use crate::protocol::{hash_source, DEFAULT_Q_SCORE, DEFAULT_TTL};
use crate::relay::{
    RelayConfig, CONGESTION_THRESHOLD, CONGESTION_WINDOW, MIN_RELAY_INTERVAL, RELAY_JITTER_MAX,
    ROUTE_CACHE_CAPACITY,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_PEER_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_TICK_MS: u64 = 1_000;
const DEFAULT_RELAY_POLL_MS: u64 = 10;
const DEFAULT_HEARTBEAT_MS: u64 = 30_000;

/// Settings for one mesh node. Durations are in milliseconds on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Stable device identifier, hashed into the wire source id
    pub device_id: String,

    pub default_ttl: u8,
    pub q_score: u8,

    pub max_mailbox_size: usize,
    pub message_expiry_ms: u64,

    pub max_pending_acks: usize,
    pub ack_timeout_ms: u64,
    pub max_retries: u32,
    pub delivered_log_capacity: usize,

    pub congestion_threshold: usize,
    pub congestion_window_ms: u64,
    pub min_relay_interval_ms: u64,
    pub relay_jitter_max_ms: u64,
    pub route_cache_capacity: usize,

    pub seen_capacity: usize,
    pub ledger_history: usize,

    /// A neighbor silent for this long no longer counts as reachable
    pub peer_timeout_ms: u64,
    /// Maintenance tick: flush, retries, expiry, neighbor aging
    pub tick_interval_ms: u64,
    /// How often the event loop checks for due relays
    pub relay_poll_ms: u64,
    /// Ping interval; 0 disables heartbeats
    pub heartbeat_interval_ms: u64,

    /// Routine frames per second (0 = unlimited)
    pub airtime_frames_per_second: u32,
    pub airtime_burst: u32,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            device_id: format!("node-{:04x}", rand::random::<u16>()),
            default_ttl: DEFAULT_TTL,
            q_score: DEFAULT_Q_SCORE,
            max_mailbox_size: MAX_MAILBOX_SIZE,
            message_expiry_ms: MESSAGE_EXPIRY.as_millis() as u64,
            max_pending_acks: MAX_PENDING_ACKS,
            ack_timeout_ms: ACK_TIMEOUT.as_millis() as u64,
            max_retries: MAX_RETRIES,
            delivered_log_capacity: DELIVERED_LOG_CAPACITY,
            congestion_threshold: CONGESTION_THRESHOLD,
            congestion_window_ms: CONGESTION_WINDOW.as_millis() as u64,
            min_relay_interval_ms: MIN_RELAY_INTERVAL.as_millis() as u64,
            relay_jitter_max_ms: RELAY_JITTER_MAX.as_millis() as u64,
            route_cache_capacity: ROUTE_CACHE_CAPACITY,
            seen_capacity: SEEN_CAPACITY,
            ledger_history: HISTORY_CAPACITY,
            peer_timeout_ms: DEFAULT_PEER_TIMEOUT_MS,
            tick_interval_ms: DEFAULT_TICK_MS,
            relay_poll_ms: DEFAULT_RELAY_POLL_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_MS,
            airtime_frames_per_second: 0,
            airtime_burst: 0,
        }
    }
}

impl MeshConfig {
    pub fn builder() -> MeshConfigBuilder {
        MeshConfigBuilder::new()
    }

    /// Defaults overridden by whatever keys the file sets
    pub fn from_json_file(path: impl AsRef<Path>) -> NodeResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: MeshConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> NodeResult<()> {
        if self.device_id.is_empty() {
            return Err(invalid("device_id", "must not be empty"));
        }
        if self.default_ttl == 0 {
            return Err(invalid("default_ttl", "must be at least 1"));
        }

        let capacities = [
            ("max_mailbox_size", self.max_mailbox_size),
            ("max_pending_acks", self.max_pending_acks),
            ("delivered_log_capacity", self.delivered_log_capacity),
            ("route_cache_capacity", self.route_cache_capacity),
            ("seen_capacity", self.seen_capacity),
            ("ledger_history", self.ledger_history),
        ];
        if let Some((field, _)) = capacities.iter().find(|(_, v)| *v == 0) {
            return Err(invalid(field, "capacity must be non-zero"));
        }

        let intervals = [
            ("message_expiry_ms", self.message_expiry_ms),
            ("ack_timeout_ms", self.ack_timeout_ms),
            ("congestion_window_ms", self.congestion_window_ms),
            ("peer_timeout_ms", self.peer_timeout_ms),
            ("tick_interval_ms", self.tick_interval_ms),
            ("relay_poll_ms", self.relay_poll_ms),
        ];
        if let Some((field, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(invalid(field, "interval must be non-zero"));
        }
        Ok(())
    }

    pub fn source_hash(&self) -> u32 {
        hash_source(&self.device_id)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn relay_poll(&self) -> Duration {
        Duration::from_millis(self.relay_poll_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    pub fn mailbox_config(&self) -> MailboxConfig {
        MailboxConfig {
            local_source: self.source_hash(),
            max_per_destination: self.max_mailbox_size,
            default_ttl: self.default_ttl,
            default_expiry: Duration::from_millis(self.message_expiry_ms),
        }
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            ack_timeout: self.ack_timeout(),
            max_retries: self.max_retries,
            max_pending: self.max_pending_acks,
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            congestion_threshold: self.congestion_threshold,
            congestion_window: Duration::from_millis(self.congestion_window_ms),
            min_relay_interval: Duration::from_millis(self.min_relay_interval_ms),
            jitter_max: Duration::from_millis(self.relay_jitter_max_ms),
            route_cache_capacity: self.route_cache_capacity,
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> NodeError {
    NodeError::InvalidConfig {
        field,
        reason: reason.to_string(),
    }
}

/// Builder for [`MeshConfig`]
#[derive(Debug, Clone, Default)]
pub struct MeshConfigBuilder {
    config: MeshConfig,
}

impl MeshConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device_id(mut self, id: impl Into<String>) -> Self {
        self.config.device_id = id.into();
        self
    }

    pub fn default_ttl(mut self, ttl: u8) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    pub fn q_score(mut self, q_score: u8) -> Self {
        self.config.q_score = q_score;
        self
    }

    pub fn max_mailbox_size(mut self, size: usize) -> Self {
        self.config.max_mailbox_size = size;
        self
    }

    pub fn message_expiry(mut self, expiry: Duration) -> Self {
        self.config.message_expiry_ms = expiry.as_millis() as u64;
        self
    }

    pub fn max_pending_acks(mut self, max: usize) -> Self {
        self.config.max_pending_acks = max;
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn congestion_threshold(mut self, threshold: usize) -> Self {
        self.config.congestion_threshold = threshold;
        self
    }

    pub fn min_relay_interval(mut self, interval: Duration) -> Self {
        self.config.min_relay_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn relay_jitter_max(mut self, jitter: Duration) -> Self {
        self.config.relay_jitter_max_ms = jitter.as_millis() as u64;
        self
    }

    pub fn seen_capacity(mut self, capacity: usize) -> Self {
        self.config.seen_capacity = capacity;
        self
    }

    pub fn peer_timeout(mut self, timeout: Duration) -> Self {
        self.config.peer_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval_ms = interval.as_millis() as u64;
        self
    }

    /// `Duration::ZERO` disables heartbeats
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn airtime(mut self, frames_per_second: u32, burst: u32) -> Self {
        self.config.airtime_frames_per_second = frames_per_second;
        self.config.airtime_burst = burst;
        self
    }

    pub fn build(self) -> MeshConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = MeshConfig::default();
        assert_eq!(config.default_ttl, 3);
        assert_eq!(config.q_score, 100);
        assert_eq!(config.max_mailbox_size, 100);
        assert_eq!(config.max_pending_acks, 500);
        assert_eq!(config.ack_timeout(), Duration::from_secs(60));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.seen_capacity, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = MeshConfig::builder().max_mailbox_size(0).build();
        assert!(matches!(
            config.validate(),
            Err(NodeError::InvalidConfig {
                field: "max_mailbox_size",
                ..
            })
        ));

        let config = MeshConfig::builder().device_id("").build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_overrides_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"device_id": "alpha", "max_retries": 2, "ack_timeout_ms": 5000}}"#).unwrap();

        let config = MeshConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.device_id, "alpha");
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.ack_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_mailbox_size, MAX_MAILBOX_SIZE);
    }

    #[test]
    fn test_invalid_json_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"seen_capacity": 0}}"#).unwrap();
        assert!(matches!(
            MeshConfig::from_json_file(file.path()),
            Err(NodeError::InvalidConfig { .. })
        ));

        assert!(matches!(
            MeshConfig::from_json_file("/nonexistent/mesh.json"),
            Err(NodeError::ConfigRead(_))
        ));
    }

    #[test]
    fn test_component_configs() {
        let config = MeshConfig::builder()
            .device_id("abc")
            .max_retries(3)
            .min_relay_interval(Duration::from_millis(250))
            .build();

        assert_eq!(config.mailbox_config().local_source, hash_source("abc"));
        assert_eq!(config.tracker_config().max_retries, 3);
        assert_eq!(
            config.relay_config().min_relay_interval,
            Duration::from_millis(250)
        );
        assert_eq!(
            MeshConfig::builder().heartbeat_interval(Duration::ZERO).build().heartbeat_interval(),
            None
        );
    }
}
