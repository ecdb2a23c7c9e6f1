//! Wire-level types: message kinds, priorities and the packet header

use crate::dedup::MessageKey;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Sentinel first byte of every frame
pub const MAGIC_BYTE: u8 = 0xAF;

/// Current protocol version
pub const PROTOCOL_VERSION: u8 = 0x02;

/// First version whose header carries the q_score byte
pub const Q_SCORE_VERSION: u8 = 0x02;

/// magic + version + type + ttl + q_score + source hash + message id
pub const HEADER_SIZE: usize = 1 + 1 + 1 + 1 + 1 + 4 + 4;

/// Pre-q_score header layout
pub const LEGACY_HEADER_SIZE: usize = HEADER_SIZE - 1;

/// q_score assumed for frames from versions predating the field
pub const LEGACY_Q_SCORE: u8 = 50;

pub const DEFAULT_TTL: u8 = 3;
pub const DEFAULT_Q_SCORE: u8 = 100;

/// Destination used for messages addressed to every peer
pub const BROADCAST: &str = "broadcast";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Sos,
    Status,
    Text,
    /// Heartbeat / discovery beacon
    Ping,
    Ack,
    Location,
    MediaChunk,
    MediaStart,
    MediaEnd,
    VoiceClip,
    StoreRequest,
    StoreDelivery,
    MailboxQuery,
    EmergencyBeacon,
    FamilySearch,
    RescueSignal,
    KeyExchange,
    Encrypted,
    /// A type byte this build does not know. Kept so newer frames can still
    /// be relayed.
    Unknown(u8),
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => Self::Sos,
            0x02 => Self::Status,
            0x03 => Self::Text,
            0x04 => Self::Ping,
            0x05 => Self::Ack,
            0x06 => Self::Location,
            0x10 => Self::MediaChunk,
            0x11 => Self::MediaStart,
            0x12 => Self::MediaEnd,
            0x13 => Self::VoiceClip,
            0x20 => Self::StoreRequest,
            0x21 => Self::StoreDelivery,
            0x22 => Self::MailboxQuery,
            0x30 => Self::EmergencyBeacon,
            0x31 => Self::FamilySearch,
            0x32 => Self::RescueSignal,
            0x40 => Self::KeyExchange,
            0x41 => Self::Encrypted,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Sos => 0x01,
            Self::Status => 0x02,
            Self::Text => 0x03,
            Self::Ping => 0x04,
            Self::Ack => 0x05,
            Self::Location => 0x06,
            Self::MediaChunk => 0x10,
            Self::MediaStart => 0x11,
            Self::MediaEnd => 0x12,
            Self::VoiceClip => 0x13,
            Self::StoreRequest => 0x20,
            Self::StoreDelivery => 0x21,
            Self::MailboxQuery => 0x22,
            Self::EmergencyBeacon => 0x30,
            Self::FamilySearch => 0x31,
            Self::RescueSignal => 0x32,
            Self::KeyExchange => 0x40,
            Self::Encrypted => 0x41,
            Self::Unknown(value) => *value,
        }
    }

    /// Fixed priority table for producers that do not override it
    pub fn priority(&self) -> Priority {
        match self {
            Self::Sos | Self::EmergencyBeacon | Self::RescueSignal => Priority::Critical,
            Self::Status | Self::FamilySearch | Self::Ack => Priority::High,
            Self::Ping => Priority::Low,
            _ => Priority::Normal,
        }
    }

    pub fn requires_ack(&self) -> bool {
        matches!(
            self,
            Self::Text | Self::Sos | Self::MediaEnd | Self::FamilySearch
        )
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Ping)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(value) => write!(f, "Unknown(0x{value:02x})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Queue priority. Lower value is served first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
    /// Forwarded on behalf of another node
    Relay = 4,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Relay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Relay => "relay",
        }
    }
}

/// Kind of acknowledgment carried in an ACK payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckType {
    Received = 0x01,
    Delivered = 0x02,
    Read = 0x03,
}

impl AckType {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Any byte other than received/delivered reads as `Read`
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => AckType::Received,
            0x02 => AckType::Delivered,
            _ => AckType::Read,
        }
    }
}

/// Originator identity as given by a producer: either already hashed, or a
/// device id string that gets reduced to 32 bits.
#[derive(Debug, Clone, Copy)]
pub enum SourceId<'a> {
    Hash(u32),
    Device(&'a str),
}

impl From<u32> for SourceId<'_> {
    fn from(hash: u32) -> Self {
        SourceId::Hash(hash)
    }
}

impl<'a> From<&'a str> for SourceId<'a> {
    fn from(id: &'a str) -> Self {
        SourceId::Device(id)
    }
}

impl<'a> From<&'a String> for SourceId<'a> {
    fn from(id: &'a String) -> Self {
        SourceId::Device(id.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub magic: u8,
    pub version: u8,
    pub kind: MessageType,
    /// Remaining hop budget
    pub ttl: u8,
    /// Path quality hint (0-100), carried but not interpreted here
    pub q_score: u8,
    pub source_hash: u32,
    pub message_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Bytes,
    /// Local receive hint from the radio, never transmitted
    pub rssi: Option<i16>,
}

impl Packet {
    pub fn kind(&self) -> MessageType {
        self.header.kind
    }

    pub fn priority(&self) -> Priority {
        self.header.kind.priority()
    }

    pub fn requires_ack(&self) -> bool {
        self.header.kind.requires_ack()
    }

    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.header.source_hash, self.header.message_id)
    }

    /// Copy for re-broadcast with one hop consumed. `None` once the hop
    /// budget is spent.
    pub fn relayed(&self) -> Option<Packet> {
        let ttl = self.header.ttl.checked_sub(1).filter(|t| *t > 0)?;
        let mut next = self.clone();
        next.header.ttl = ttl;
        next.header.version = PROTOCOL_VERSION;
        next.rssi = None;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_codes_round_trip() {
        for code in 0u8..=0xFF {
            assert_eq!(MessageType::from_u8(code).as_u8(), code);
        }
        assert_eq!(MessageType::from_u8(0x30), MessageType::EmergencyBeacon);
        assert_eq!(MessageType::from_u8(0x7F), MessageType::Unknown(0x7F));
    }

    #[test]
    fn test_priority_table() {
        assert_eq!(MessageType::Sos.priority(), Priority::Critical);
        assert_eq!(MessageType::EmergencyBeacon.priority(), Priority::Critical);
        assert_eq!(MessageType::RescueSignal.priority(), Priority::Critical);
        assert_eq!(MessageType::Status.priority(), Priority::High);
        assert_eq!(MessageType::FamilySearch.priority(), Priority::High);
        assert_eq!(MessageType::Ack.priority(), Priority::High);
        assert_eq!(MessageType::Ping.priority(), Priority::Low);
        assert_eq!(MessageType::Text.priority(), Priority::Normal);
        assert_eq!(MessageType::Unknown(0x99).priority(), Priority::Normal);
    }

    #[test]
    fn test_requires_ack() {
        let acked: Vec<_> = (0u8..=0xFF)
            .map(MessageType::from_u8)
            .filter(|t| t.requires_ack())
            .collect();
        assert_eq!(
            acked,
            vec![
                MessageType::Sos,
                MessageType::Text,
                MessageType::MediaEnd,
                MessageType::FamilySearch
            ]
        );
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert!(Priority::Low < Priority::Relay);
    }

    #[test]
    fn test_ack_type_lenient_decode() {
        assert_eq!(AckType::from_u8(1), AckType::Received);
        assert_eq!(AckType::from_u8(2), AckType::Delivered);
        assert_eq!(AckType::from_u8(3), AckType::Read);
        assert_eq!(AckType::from_u8(9), AckType::Read);
    }

    #[test]
    fn test_relayed_consumes_one_hop() {
        let packet = Packet {
            header: PacketHeader {
                magic: MAGIC_BYTE,
                version: 0x01,
                kind: MessageType::Text,
                ttl: 2,
                q_score: 80,
                source_hash: 7,
                message_id: 9,
            },
            payload: Bytes::from_static(b"hi"),
            rssi: Some(-60),
        };

        let next = packet.relayed().unwrap();
        assert_eq!(next.header.ttl, 1);
        assert_eq!(next.header.version, PROTOCOL_VERSION);
        assert_eq!(next.rssi, None);
        assert!(next.relayed().is_none());
    }
}
