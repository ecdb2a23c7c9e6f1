use crate::clock::Millis;
use crate::protocol::{MessageType, Priority};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MAX_MAILBOX_SIZE: usize = 100;
pub const MESSAGE_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A message queued for eventual delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Local UUID, stable across retries
    pub id: String,

    /// Wire message id
    pub message_id: u32,

    /// Source hash of the local device
    pub sender_id: u32,

    /// Peer id, or "broadcast"
    pub target_peer_id: String,

    #[serde(rename = "type")]
    pub kind: MessageType,

    pub payload: Bytes,

    pub priority: Priority,

    pub ttl: u8,

    pub created_at: Millis,

    pub expires_at: Millis,

    pub retry_count: u32,

    pub last_attempt_at: Option<Millis>,

    /// Insertion order within the mailbox, breaks `created_at` ties
    #[serde(default)]
    pub(crate) seq: u64,
}

impl StoredMessage {
    pub fn is_expired(&self, now: Millis) -> bool {
        self.expires_at < now
    }

    pub fn is_attempted(&self) -> bool {
        self.last_attempt_at.is_some()
    }
}

/// Per-message overrides for [`Mailbox::store_for_peer`](crate::mailbox::Mailbox::store_for_peer)
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    pub priority: Option<Priority>,
    pub ttl: Option<u8>,
    pub expiry: Option<Duration>,
    /// Fixed wire id instead of a random one
    pub message_id: Option<u32>,
}

impl StoreOptions {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn with_message_id(mut self, message_id: u32) -> Self {
        self.message_id = Some(message_id);
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MailboxConfig {
    /// Source hash stamped on stored messages
    pub local_source: u32,
    pub max_per_destination: usize,
    pub default_ttl: u8,
    pub default_expiry: Duration,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            local_source: 0,
            max_per_destination: MAX_MAILBOX_SIZE,
            default_ttl: crate::protocol::DEFAULT_TTL,
            default_expiry: MESSAGE_EXPIRY,
        }
    }
}

/// Fired by [`Mailbox::mark_delivered`](crate::mailbox::Mailbox::mark_delivered)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDelivered {
    pub id: String,
    pub peer_id: String,
}

/// Mailbox statistics
#[derive(Debug, Clone, Default)]
pub struct MailboxStats {
    pub total_messages: usize,
    pub destinations: usize,
    pub stored: u64,
    pub delivered: u64,
    pub evicted: u64,
    pub expired: u64,
    pub cancelled: u64,
}

impl std::fmt::Display for MailboxStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Messages: {} across {} destinations, Stored: {}, Delivered: {}, Evicted: {}, Expired: {}",
            self.total_messages,
            self.destinations,
            self.stored,
            self.delivered,
            self.evicted,
            self.expired
        )
    }
}
