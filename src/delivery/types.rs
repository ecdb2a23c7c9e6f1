use crate::clock::Millis;
use crate::protocol::{AckType, Priority};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ACK_TIMEOUT: Duration = Duration::from_secs(60);
pub const MAX_RETRIES: u32 = 5;
pub const MAX_PENDING_ACKS: usize = 500;
pub const DELIVERED_LOG_CAPACITY: usize = 1000;

/// A transmitted message awaiting acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAck {
    /// Wire message id the ACK will reference
    pub message_id: u32,

    /// Destination the message was sent towards
    pub target_peer_id: String,

    /// Last (re)transmission time
    pub sent_at: Millis,

    pub retry_count: u32,

    pub priority: Priority,

    /// Encoded frame, resent verbatim on retry
    pub original_payload: Bytes,

    /// Insertion order, breaks `sent_at` ties
    #[serde(default)]
    pub(crate) seq: u64,
}

impl PendingAck {
    pub fn new(
        message_id: u32,
        target_peer_id: impl Into<String>,
        original_payload: Bytes,
        priority: Priority,
        sent_at: Millis,
    ) -> Self {
        Self {
            message_id,
            target_peer_id: target_peer_id.into(),
            sent_at,
            retry_count: 0,
            priority,
            original_payload,
            seq: 0,
        }
    }

    pub(crate) fn eviction_key(&self) -> (Priority, Millis, u64) {
        (self.priority, self.sent_at, self.seq)
    }
}

/// Result of [`DeliveryTracker::increment_retry`](crate::delivery::DeliveryTracker::increment_retry)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Entry stays pending with the new count
    Retrying { retry_count: u32 },
    /// Retry budget spent; the entry has been purged
    Exhausted,
    /// No such pending entry
    NotPending,
}

/// Emitted when an ACK clears a pending entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckEvent {
    pub message_id: u32,
    pub ack_type: AckType,
    pub receiver_hash: u32,
    pub target_peer_id: String,
    /// Time from the last transmission to the ACK
    pub latency_ms: Millis,
}

#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    pub ack_timeout: Duration,
    pub max_retries: u32,
    pub max_pending: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            ack_timeout: ACK_TIMEOUT,
            max_retries: MAX_RETRIES,
            max_pending: MAX_PENDING_ACKS,
        }
    }
}

/// Tracker statistics
#[derive(Debug, Clone, Default)]
pub struct TrackerStats {
    pub pending: usize,
    pub delivered_ids: usize,
    pub tracked: u64,
    pub acked: u64,
    pub retries: u64,
    pub exhausted: u64,
    pub evicted: u64,
}

impl std::fmt::Display for TrackerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pending: {}, Acked: {}/{}, Retries: {}, Exhausted: {}, Evicted: {}",
            self.pending, self.acked, self.tracked, self.retries, self.exhausted, self.evicted
        )
    }
}
