//! Frame encoding and decoding
//!
//! Layout (big endian):
//!
//! ```text
//! 0      1        2     3    4        5            9            13
//! | 0xAF | version | type | ttl | q_score | source hash | message id | payload...
//! ```
//!
//! Version 1 frames have no q_score byte; the rest of the header shifts
//! left by one.

use crate::protocol::types::{
    MessageType, Packet, PacketHeader, SourceId, HEADER_SIZE, LEGACY_HEADER_SIZE,
    LEGACY_Q_SCORE, MAGIC_BYTE, PROTOCOL_VERSION, Q_SCORE_VERSION,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Stateless codec for mesh frames
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketCodec;

impl PacketCodec {
    /// Encode a frame. A missing `message_id` gets a random one.
    pub fn encode<'a>(
        kind: MessageType,
        source: impl Into<SourceId<'a>>,
        payload: &[u8],
        ttl: u8,
        q_score: u8,
        message_id: Option<u32>,
    ) -> Bytes {
        let source_hash = match source.into() {
            SourceId::Hash(hash) => hash,
            SourceId::Device(id) => hash_source(id),
        };
        let message_id = message_id.unwrap_or_else(rand::random::<u32>);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u8(MAGIC_BYTE);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(kind.as_u8());
        buf.put_u8(ttl);
        buf.put_u8(q_score);
        buf.put_u32(source_hash);
        buf.put_u32(message_id);
        buf.put_slice(payload);
        buf.freeze()
    }

    /// Re-encode a decoded packet with its current header values
    pub fn encode_packet(packet: &Packet) -> Bytes {
        let h = &packet.header;
        Self::encode(
            h.kind,
            h.source_hash,
            &packet.payload,
            h.ttl,
            h.q_score,
            Some(h.message_id),
        )
    }

    /// Decode a frame. Anything too short or not starting with the magic
    /// byte yields `None`.
    pub fn decode(frame: &[u8]) -> Option<Packet> {
        if frame.len() < HEADER_SIZE || frame[0] != MAGIC_BYTE {
            return None;
        }

        let mut buf = frame;
        let magic = buf.get_u8();
        let version = buf.get_u8();
        let kind = MessageType::from_u8(buf.get_u8());
        let ttl = buf.get_u8();
        let q_score = if version >= Q_SCORE_VERSION {
            buf.get_u8()
        } else {
            LEGACY_Q_SCORE
        };
        let source_hash = buf.get_u32();
        let message_id = buf.get_u32();

        debug_assert_eq!(
            frame.len() - buf.remaining(),
            if version >= Q_SCORE_VERSION {
                HEADER_SIZE
            } else {
                LEGACY_HEADER_SIZE
            }
        );

        Some(Packet {
            header: PacketHeader {
                magic,
                version,
                kind,
                ttl,
                q_score,
                source_hash,
                message_id,
            },
            payload: Bytes::copy_from_slice(buf),
            rssi: None,
        })
    }

    /// Decode and attach the radio's signal hint
    pub fn decode_with_rssi(frame: &[u8], rssi: Option<i16>) -> Option<Packet> {
        Self::decode(frame).map(|mut packet| {
            packet.rssi = rssi;
            packet
        })
    }
}

/// DJB2 variant over UTF-16 code units, last to first, wrapping at 32 bits.
/// Must match every other implementation on the mesh bit for bit.
pub fn hash_source(id: &str) -> u32 {
    let units: Vec<u16> = id.encode_utf16().collect();
    units
        .iter()
        .rev()
        .fold(5381u32, |hash, unit| hash.wrapping_mul(33) ^ u32::from(*unit))
}
