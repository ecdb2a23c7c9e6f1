//! Mesh wire protocol
//!
//! Fixed 13-byte header followed by a type-specific payload. Decoding is
//! total: malformed input yields `None`, never a panic.

pub mod codec;
pub mod payload;
pub mod types;

pub use codec::{hash_source, PacketCodec};
pub use payload::{
    ack_frame, AckPayload, EmergencyBeaconPayload, LocationPayload, MediaChunkPayload,
    MediaKind, MediaStartPayload, SosPayload, StoreRequestPayload, WirePayload,
};
pub use types::{
    AckType, MessageType, Packet, PacketHeader, Priority, SourceId, BROADCAST, DEFAULT_Q_SCORE,
    DEFAULT_TTL, HEADER_SIZE, MAGIC_BYTE, PROTOCOL_VERSION,
};

pub fn priority_for_type(kind: MessageType) -> Priority {
    kind.priority()
}

pub fn requires_ack(kind: MessageType) -> bool {
    kind.requires_ack()
}
