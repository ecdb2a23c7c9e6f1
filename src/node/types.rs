use crate::clock::Millis;
use crate::dedup::MessageKey;
use crate::delivery::TrackerStats;
use crate::ledger::LedgerStats;
use crate::mailbox::MailboxStats;
use crate::protocol::Priority;
use crate::relay::RelayStats;
use bytes::Bytes;

/// A device heard recently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub source_hash: u32,
    pub last_seen: Millis,
    pub rssi: Option<i16>,
    pub q_score: u8,
}

/// What the receive path did with one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// Not a mesh frame
    Malformed,
    /// Our own frame relayed back to us
    OwnEcho,
    /// Already seen
    Duplicate,
    Heartbeat,
    /// `matched` is false when no pending message had that id
    Ack { matched: bool },
    Message(MessageKey),
}

/// Raised when a message ran out of retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailed {
    pub message_id: u32,
    pub target_peer_id: String,
    pub retries: u32,
}

/// Work done by one maintenance tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sent: usize,
    pub retransmitted: usize,
    pub failed: usize,
    pub expired: usize,
    pub neighbors_lost: usize,
    pub relayed: usize,
    pub heartbeat: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct QueuedRelay {
    pub due: Millis,
    pub key: MessageKey,
    pub priority: Priority,
    pub frame: Bytes,
}

/// Aggregated node statistics
#[derive(Debug, Clone, Default)]
pub struct NodeStats {
    pub mailbox: MailboxStats,
    pub tracker: TrackerStats,
    pub relay: RelayStats,
    pub ledger: LedgerStats,
    pub neighbors: usize,
    pub queued_relays: usize,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub malformed: u64,
    pub duplicates: u64,
    pub relayed: u64,
    pub send_failures: u64,
    pub airtime_deferred: u64,
}

impl std::fmt::Display for NodeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Neighbors: {}, Sent: {}, Received: {}, Relayed: {}, Malformed: {}, Duplicates: {} | {} | {} | {}",
            self.neighbors,
            self.frames_sent,
            self.frames_received,
            self.relayed,
            self.malformed,
            self.duplicates,
            self.mailbox,
            self.tracker,
            self.ledger
        )
    }
}
