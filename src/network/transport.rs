//! Radio boundary
//!
//! The mesh core never touches the radio directly. It hands encoded frames
//! to a [`Transport`] and is fed [`InboundFrame`]s by whoever owns the
//! receive side.

use crate::network::error::NetworkResult;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

/// Broadcast-only link: every frame goes to whoever is in range
pub trait Transport: Send + Sync {
    fn send(&self, frame: Bytes) -> NetworkResult<()>;
}

/// A frame picked up by the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub bytes: Bytes,
    /// Signal strength in dBm when the radio reports it
    pub rssi: Option<i16>,
}

impl InboundFrame {
    pub fn new(bytes: impl Into<Bytes>, rssi: Option<i16>) -> Self {
        Self {
            bytes: bytes.into(),
            rssi,
        }
    }
}

/// Transport that keeps every frame it is given
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<Bytes>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub fn take(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, frame: Bytes) -> NetworkResult<()> {
        self.sent.lock().push(frame);
        Ok(())
    }
}
