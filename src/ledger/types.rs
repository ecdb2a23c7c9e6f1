use crate::clock::Millis;
use crate::dedup::MessageKey;
use crate::protocol::{MessageType, Priority};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub const SEEN_CAPACITY: usize = 1000;
pub const HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    Pending,
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryState {
    fn rank(&self) -> Option<u8> {
        match self {
            DeliveryState::Pending => Some(0),
            DeliveryState::Sending => Some(1),
            DeliveryState::Sent => Some(2),
            DeliveryState::Delivered => Some(3),
            DeliveryState::Read => Some(4),
            DeliveryState::Failed => None,
        }
    }

    /// Forward-only along pending, sending, sent, delivered, read. Failed is
    /// reachable before delivery; leaving it takes an explicit retry.
    pub fn can_transition_to(&self, next: DeliveryState) -> bool {
        if *self == next {
            return true;
        }
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to > from,
            (Some(_), None) => matches!(
                self,
                DeliveryState::Pending | DeliveryState::Sending | DeliveryState::Sent
            ),
            (None, _) => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Read | DeliveryState::Failed)
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryState::Delivered | DeliveryState::Read)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// The local view of one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerMessage {
    pub key: MessageKey,
    pub kind: MessageType,
    pub direction: Direction,
    /// Peer id or "broadcast" for outgoing messages, empty for incoming
    pub target_peer_id: String,
    pub payload: Bytes,
    pub priority: Priority,
    pub status: DeliveryState,
    pub created_at: Millis,
    pub retry_count: u32,
    pub last_retry_at: Option<Millis>,
    /// Receiver hashes that acknowledged
    pub acks: Vec<u32>,
    /// Mailbox id while the message is queued locally
    pub local_id: Option<String>,
    pub rssi: Option<i16>,
    /// TTL of the first copy heard, for incoming messages
    pub hop_ttl: Option<u8>,
}

impl LedgerMessage {
    pub fn outgoing(
        key: MessageKey,
        kind: MessageType,
        target_peer_id: impl Into<String>,
        payload: Bytes,
        priority: Priority,
        created_at: Millis,
    ) -> Self {
        Self {
            key,
            kind,
            direction: Direction::Outgoing,
            target_peer_id: target_peer_id.into(),
            payload,
            priority,
            status: DeliveryState::Pending,
            created_at,
            retry_count: 0,
            last_retry_at: None,
            acks: Vec::new(),
            local_id: None,
            rssi: None,
            hop_ttl: None,
        }
    }

    /// A message heard on the mesh. Receipt is delivery from our side.
    pub fn incoming(
        key: MessageKey,
        kind: MessageType,
        payload: Bytes,
        received_at: Millis,
        rssi: Option<i16>,
    ) -> Self {
        Self {
            key,
            kind,
            direction: Direction::Incoming,
            target_peer_id: String::new(),
            payload,
            priority: kind.priority(),
            status: DeliveryState::Delivered,
            created_at: received_at,
            retry_count: 0,
            last_retry_at: None,
            acks: Vec::new(),
            local_id: None,
            rssi,
            hop_ttl: None,
        }
    }

    pub fn with_local_id(mut self, id: impl Into<String>) -> Self {
        self.local_id = Some(id.into());
        self
    }

    pub fn with_hop_ttl(mut self, ttl: u8) -> Self {
        self.hop_ttl = Some(ttl);
        self
    }
}

/// Emitted whenever a message's status changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub key: MessageKey,
    pub from: DeliveryState,
    pub to: DeliveryState,
}

/// Ledger statistics
#[derive(Debug, Clone, Default)]
pub struct LedgerStats {
    pub total_messages: usize,
    pub outgoing: usize,
    pub failed: usize,
    pub seen_ids: usize,
    pub duplicates_rejected: u64,
}

impl std::fmt::Display for LedgerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Messages: {}, Outgoing: {}, Failed: {}, Seen: {}, Duplicates: {}",
            self.total_messages, self.outgoing, self.failed, self.seen_ids, self.duplicates_rejected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeliveryState::*;

    #[test]
    fn test_forward_only() {
        assert!(Pending.can_transition_to(Sending));
        assert!(Sending.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Delivered));
        assert!(Delivered.can_transition_to(Read));
        assert!(Pending.can_transition_to(Sent));

        assert!(!Sent.can_transition_to(Sending));
        assert!(!Read.can_transition_to(Delivered));
        assert!(!Delivered.can_transition_to(Pending));
    }

    #[test]
    fn test_failed_edges() {
        for from in [Pending, Sending, Sent] {
            assert!(from.can_transition_to(Failed));
        }
        assert!(!Delivered.can_transition_to(Failed));
        assert!(!Read.can_transition_to(Failed));

        for to in [Pending, Sending, Sent, Delivered, Read] {
            assert!(!Failed.can_transition_to(to));
        }
    }

    #[test]
    fn test_same_state_is_allowed() {
        for s in [Pending, Sending, Sent, Delivered, Read, Failed] {
            assert!(s.can_transition_to(s));
        }
    }
}
