//! Typed payload layouts
//!
//! Each payload knows its minimum length and reads itself from a cursor.
//! Short input yields `None`.

use crate::protocol::codec::PacketCodec;
use crate::protocol::types::{AckType, MessageType, Packet, DEFAULT_Q_SCORE};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const MAX_BEACON_NAME_CHARS: usize = 20;
pub const MAX_HEADING_DEGREES: u16 = 360;

pub trait WirePayload: Sized {
    const MIN_LEN: usize;

    fn write(&self, buf: &mut BytesMut);

    /// Called only with `buf.remaining() >= MIN_LEN`
    fn read(buf: &mut &[u8]) -> Option<Self>;

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::MIN_LEN);
        self.write(&mut buf);
        buf.freeze()
    }

    fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::MIN_LEN {
            return None;
        }
        let mut cursor = bytes;
        Self::read(&mut cursor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SosPayload {
    pub lat: f32,
    pub lon: f32,
    pub status: u8,
}

impl WirePayload for SosPayload {
    const MIN_LEN: usize = 9;

    fn write(&self, buf: &mut BytesMut) {
        buf.put_f32(self.lat);
        buf.put_f32(self.lon);
        buf.put_u8(self.status);
    }

    fn read(buf: &mut &[u8]) -> Option<Self> {
        Some(Self {
            lat: buf.get_f32(),
            lon: buf.get_f32(),
            status: buf.get_u8(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPayload {
    pub original_message_id: u32,
    pub ack_type: AckType,
    pub receiver_hash: u32,
}

impl WirePayload for AckPayload {
    const MIN_LEN: usize = 9;

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32(self.original_message_id);
        buf.put_u8(self.ack_type.as_u8());
        buf.put_u32(self.receiver_hash);
    }

    fn read(buf: &mut &[u8]) -> Option<Self> {
        Some(Self {
            original_message_id: buf.get_u32(),
            ack_type: AckType::from_u8(buf.get_u8()),
            receiver_hash: buf.get_u32(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationPayload {
    pub lat: f32,
    pub lon: f32,
    /// Meters
    pub accuracy: u16,
    /// m/s
    pub speed: u8,
    /// Degrees, 0..=360
    pub heading: u16,
}

impl LocationPayload {
    /// Clamps out-of-range readings to what the wire can carry
    pub fn new(lat: f32, lon: f32, accuracy: u32, speed: u32, heading: u32) -> Self {
        Self {
            lat,
            lon,
            accuracy: accuracy.min(u32::from(u16::MAX)) as u16,
            speed: speed.min(u32::from(u8::MAX)) as u8,
            heading: heading.min(u32::from(MAX_HEADING_DEGREES)) as u16,
        }
    }
}

impl WirePayload for LocationPayload {
    const MIN_LEN: usize = 13;

    fn write(&self, buf: &mut BytesMut) {
        buf.put_f32(self.lat);
        buf.put_f32(self.lon);
        buf.put_u16(self.accuracy);
        buf.put_u8(self.speed);
        buf.put_u16(self.heading);
    }

    fn read(buf: &mut &[u8]) -> Option<Self> {
        Some(Self {
            lat: buf.get_f32(),
            lon: buf.get_f32(),
            accuracy: buf.get_u16(),
            speed: buf.get_u8(),
            heading: buf.get_u16(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmergencyBeaconPayload {
    pub lat: f32,
    pub lon: f32,
    pub battery_pct: u8,
    /// Unix seconds
    pub timestamp: u32,
    pub reason_code: u8,
    pub name: Option<String>,
}

impl EmergencyBeaconPayload {
    pub fn new(
        lat: f32,
        lon: f32,
        battery_pct: u8,
        timestamp: u32,
        reason_code: u8,
        name: Option<&str>,
    ) -> Self {
        Self {
            lat,
            lon,
            battery_pct: battery_pct.min(100),
            timestamp,
            reason_code,
            name: name
                .filter(|n| !n.is_empty())
                .map(|n| n.chars().take(MAX_BEACON_NAME_CHARS).collect()),
        }
    }
}

impl WirePayload for EmergencyBeaconPayload {
    const MIN_LEN: usize = 14;

    fn write(&self, buf: &mut BytesMut) {
        buf.put_f32(self.lat);
        buf.put_f32(self.lon);
        buf.put_u8(self.battery_pct);
        buf.put_u32(self.timestamp);
        buf.put_u8(self.reason_code);
        if let Some(name) = &self.name {
            buf.put_slice(name.as_bytes());
        }
    }

    fn read(buf: &mut &[u8]) -> Option<Self> {
        let lat = buf.get_f32();
        let lon = buf.get_f32();
        let battery_pct = buf.get_u8();
        let timestamp = buf.get_u32();
        let reason_code = buf.get_u8();
        let name = (!buf.is_empty()).then(|| String::from_utf8_lossy(buf).into_owned());
        buf.advance(buf.remaining());

        Some(Self {
            lat,
            lon,
            battery_pct,
            timestamp,
            reason_code,
            name,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunkPayload {
    pub total_chunks: u16,
    pub chunk_index: u16,
    pub media_id: u32,
    pub data: Bytes,
}

impl WirePayload for MediaChunkPayload {
    const MIN_LEN: usize = 8;

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u16(self.total_chunks);
        buf.put_u16(self.chunk_index);
        buf.put_u32(self.media_id);
        buf.put_slice(&self.data);
    }

    fn read(buf: &mut &[u8]) -> Option<Self> {
        let total_chunks = buf.get_u16();
        let chunk_index = buf.get_u16();
        let media_id = buf.get_u32();
        let data = buf.copy_to_bytes(buf.remaining());
        Some(Self {
            total_chunks,
            chunk_index,
            media_id,
            data,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image = 1,
    Voice = 2,
    File = 3,
}

impl MediaKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MediaKind::Image),
            2 => Some(MediaKind::Voice),
            3 => Some(MediaKind::File),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStartPayload {
    pub media_id: u32,
    pub kind: MediaKind,
    pub total_size: u32,
    pub filename: Option<String>,
}

impl WirePayload for MediaStartPayload {
    const MIN_LEN: usize = 9;

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32(self.media_id);
        buf.put_u8(self.kind as u8);
        buf.put_u32(self.total_size);
        if let Some(name) = &self.filename {
            buf.put_slice(name.as_bytes());
        }
    }

    fn read(buf: &mut &[u8]) -> Option<Self> {
        let media_id = buf.get_u32();
        let kind = MediaKind::from_u8(buf.get_u8())?;
        let total_size = buf.get_u32();
        let filename = (!buf.is_empty()).then(|| String::from_utf8_lossy(buf).into_owned());
        buf.advance(buf.remaining());
        Some(Self {
            media_id,
            kind,
            total_size,
            filename,
        })
    }
}

/// Ask a neighbor to hand over anything it holds for `target_hash`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreRequestPayload {
    pub target_hash: u32,
    pub last_known_message_id: u32,
}

impl WirePayload for StoreRequestPayload {
    const MIN_LEN: usize = 8;

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32(self.target_hash);
        buf.put_u32(self.last_known_message_id);
    }

    fn read(buf: &mut &[u8]) -> Option<Self> {
        Some(Self {
            target_hash: buf.get_u32(),
            last_known_message_id: buf.get_u32(),
        })
    }
}

/// ACK reply for a received packet: single hop, full quality, `Received`
pub fn ack_frame(original: &Packet, local_source: u32) -> Bytes {
    let payload = AckPayload {
        original_message_id: original.header.message_id,
        ack_type: AckType::Received,
        receiver_hash: local_source,
    };
    PacketCodec::encode(
        MessageType::Ack,
        local_source,
        &payload.to_bytes(),
        1,
        DEFAULT_Q_SCORE,
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sos_layout() {
        let sos = SosPayload {
            lat: 1.5,
            lon: -2.0,
            status: 3,
        };
        let bytes = sos.to_bytes();
        assert_eq!(hex::encode(&bytes), "3fc00000c000000003");
        assert_eq!(SosPayload::parse(&bytes), Some(sos));
        assert_eq!(SosPayload::parse(&bytes[..8]), None);
    }

    #[test]
    fn test_ack_layout() {
        let bytes = hex::decode("0000002a0200000007").unwrap();
        let ack = AckPayload::parse(&bytes).unwrap();
        assert_eq!(ack.original_message_id, 42);
        assert_eq!(ack.ack_type, AckType::Delivered);
        assert_eq!(ack.receiver_hash, 7);
        assert_eq!(ack.to_bytes().as_ref(), bytes.as_slice());
    }

    #[test]
    fn test_location_clamps() {
        let loc = LocationPayload::new(10.0, 20.0, 100_000, 300, 720);
        assert_eq!(loc.accuracy, u16::MAX);
        assert_eq!(loc.speed, u8::MAX);
        assert_eq!(loc.heading, 360);

        let bytes = loc.to_bytes();
        assert_eq!(bytes.len(), LocationPayload::MIN_LEN);
        assert_eq!(LocationPayload::parse(&bytes), Some(loc));
    }

    #[test]
    fn test_beacon_truncates_name_and_battery() {
        let beacon = EmergencyBeaconPayload::new(
            0.0,
            0.0,
            150,
            1_700_000_000,
            2,
            Some("a-rather-long-survivor-name"),
        );
        assert_eq!(beacon.battery_pct, 100);
        assert_eq!(beacon.name.as_deref(), Some("a-rather-long-surviv"));

        let parsed = EmergencyBeaconPayload::parse(&beacon.to_bytes()).unwrap();
        assert_eq!(parsed, beacon);
    }

    #[test]
    fn test_beacon_without_name() {
        let beacon = EmergencyBeaconPayload::new(1.0, 1.0, 40, 5, 0, None);
        let bytes = beacon.to_bytes();
        assert_eq!(bytes.len(), 14);
        assert_eq!(EmergencyBeaconPayload::parse(&bytes).unwrap().name, None);
        assert!(EmergencyBeaconPayload::parse(&bytes[..13]).is_none());
    }

    #[test]
    fn test_media_chunk_carries_data() {
        let chunk = MediaChunkPayload {
            total_chunks: 4,
            chunk_index: 1,
            media_id: 0xABCD,
            data: Bytes::from_static(b"jpeg"),
        };
        let parsed = MediaChunkPayload::parse(&chunk.to_bytes()).unwrap();
        assert_eq!(parsed, chunk);
        assert!(MediaChunkPayload::parse(&[0u8; 7]).is_none());
    }

    #[test]
    fn test_media_start_rejects_unknown_kind() {
        let mut bytes = MediaStartPayload {
            media_id: 1,
            kind: MediaKind::Voice,
            total_size: 2048,
            filename: Some("clip.opus".into()),
        }
        .to_bytes()
        .to_vec();
        assert_eq!(
            MediaStartPayload::parse(&bytes).unwrap().filename.as_deref(),
            Some("clip.opus")
        );

        bytes[4] = 9;
        assert!(MediaStartPayload::parse(&bytes).is_none());
    }

    #[test]
    fn test_store_request() {
        let req = StoreRequestPayload {
            target_hash: 5,
            last_known_message_id: 6,
        };
        assert_eq!(hex::encode(req.to_bytes()), "0000000500000006");
    }

    #[test]
    fn test_ack_frame_shape() {
        let original = PacketCodec::decode(&PacketCodec::encode(
            MessageType::Text,
            11u32,
            b"hello",
            3,
            90,
            Some(77),
        ))
        .unwrap();

        let reply = PacketCodec::decode(&ack_frame(&original, 22)).unwrap();
        assert_eq!(reply.header.kind, MessageType::Ack);
        assert_eq!(reply.header.ttl, 1);
        assert_eq!(reply.header.q_score, 100);
        assert_eq!(reply.header.source_hash, 22);

        let ack = AckPayload::parse(&reply.payload).unwrap();
        assert_eq!(ack.original_message_id, 77);
        assert_eq!(ack.ack_type, AckType::Received);
        assert_eq!(ack.receiver_hash, 22);
    }
}
