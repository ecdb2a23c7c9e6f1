//! In-process broadcast medium
//!
//! Stands in for the radio in the simulator and in integration tests. Each
//! node joins through a [`MediumPort`]; a frame sent on a port reaches every
//! port linked to it, minus random loss.

use crate::network::error::{NetworkError, NetworkResult};
use crate::network::transport::{InboundFrame, Transport};
use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Properties of a link between two ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub rssi: i16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediumStats {
    pub sent: u64,
    pub delivered: u64,
    pub lost: u64,
}

#[derive(Default)]
struct MediumState {
    ports: Vec<Option<mpsc::UnboundedSender<InboundFrame>>>,
    links: HashMap<(usize, usize), Link>,
    loss_rate: f64,
    mtu: Option<usize>,
    stats: MediumStats,
}

fn link_key(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

pub struct SimulatedMedium {
    state: Mutex<MediumState>,
    rng: Mutex<StdRng>,
}

impl SimulatedMedium {
    pub fn new() -> Arc<Self> {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic loss pattern
    pub fn with_seed(seed: u64) -> Arc<Self> {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MediumState::default()),
            rng: Mutex::new(rng),
        })
    }

    /// Attach a new radio. Frames for it arrive on the returned receiver.
    pub fn join(self: &Arc<Self>) -> (MediumPort, mpsc::UnboundedReceiver<InboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        let id = state.ports.len();
        state.ports.push(Some(tx));
        (
            MediumPort {
                id,
                medium: self.clone(),
            },
            rx,
        )
    }

    /// Power a radio off. Its links stay in place for when it returns.
    pub fn leave(&self, port: usize) {
        if let Some(slot) = self.state.lock().ports.get_mut(port) {
            *slot = None;
        }
    }

    pub fn link(&self, a: usize, b: usize, rssi: i16) {
        if a != b {
            self.state.lock().links.insert(link_key(a, b), Link { rssi });
        }
    }

    pub fn unlink(&self, a: usize, b: usize) {
        self.state.lock().links.remove(&link_key(a, b));
    }

    /// Link every pair of joined ports
    pub fn connect_all(&self, rssi: i16) {
        let mut state = self.state.lock();
        let count = state.ports.len();
        for a in 0..count {
            for b in (a + 1)..count {
                state.links.insert((a, b), Link { rssi });
            }
        }
    }

    /// Link ports in a line: `ids[0] - ids[1] - ids[2] ...`
    pub fn chain(&self, ids: &[usize], rssi: i16) {
        for pair in ids.windows(2) {
            self.link(pair[0], pair[1], rssi);
        }
    }

    pub fn is_linked(&self, a: usize, b: usize) -> bool {
        self.state.lock().links.contains_key(&link_key(a, b))
    }

    /// Probability in `[0, 1]` that any single delivery is dropped
    pub fn set_loss_rate(&self, loss_rate: f64) {
        self.state.lock().loss_rate = loss_rate.clamp(0.0, 1.0);
    }

    pub fn set_mtu(&self, mtu: Option<usize>) {
        self.state.lock().mtu = mtu;
    }

    pub fn stats(&self) -> MediumStats {
        self.state.lock().stats
    }

    /// Deliver `frame` to every live neighbor of `from`. Returns the number
    /// of receivers that got it.
    fn broadcast(&self, from: usize, frame: Bytes) -> NetworkResult<usize> {
        let mut state = self.state.lock();
        if from >= state.ports.len() {
            return Err(NetworkError::UnknownPort(from));
        }
        if state.ports[from].is_none() {
            return Err(NetworkError::MediumClosed);
        }
        if let Some(mtu) = state.mtu.filter(|mtu| frame.len() > *mtu) {
            return Err(NetworkError::FrameTooLarge {
                size: frame.len(),
                mtu,
            });
        }
        state.stats.sent += 1;

        let neighbors: Vec<(usize, Link)> = state
            .links
            .iter()
            .filter_map(|(&(a, b), link)| match from {
                f if f == a => Some((b, *link)),
                f if f == b => Some((a, *link)),
                _ => None,
            })
            .collect();

        let mut delivered = 0;
        for (to, link) in neighbors {
            let lost = state.loss_rate > 0.0 && self.rng.lock().gen_bool(state.loss_rate);
            if lost {
                state.stats.lost += 1;
                trace!(from, to, "frame lost");
                continue;
            }
            let Some(Some(tx)) = state.ports.get(to) else {
                continue;
            };
            if tx.send(InboundFrame::new(frame.clone(), Some(link.rssi))).is_ok() {
                delivered += 1;
            }
        }
        state.stats.delivered += delivered as u64;
        Ok(delivered)
    }
}

/// One radio's handle on the medium
#[derive(Clone)]
pub struct MediumPort {
    id: usize,
    medium: Arc<SimulatedMedium>,
}

impl MediumPort {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Transport for MediumPort {
    fn send(&self, frame: Bytes) -> NetworkResult<()> {
        self.medium.broadcast(self.id, frame).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_reach_linked_ports_only() {
        let medium = SimulatedMedium::with_seed(1);
        let (a, _rx_a) = medium.join();
        let (_b, mut rx_b) = medium.join();
        let (_c, mut rx_c) = medium.join();
        medium.link(0, 1, -60);

        a.send(Bytes::from_static(b"hello")).unwrap();

        let frame = rx_b.recv().await.unwrap();
        assert_eq!(&frame.bytes[..], b"hello");
        assert_eq!(frame.rssi, Some(-60));
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sender_does_not_hear_itself() {
        let medium = SimulatedMedium::with_seed(1);
        let (a, mut rx_a) = medium.join();
        let (_b, _rx_b) = medium.join();
        medium.connect_all(-50);

        a.send(Bytes::from_static(b"x")).unwrap();
        assert!(rx_a.try_recv().is_err());
        assert_eq!(medium.stats().delivered, 1);
    }

    #[test]
    fn test_full_loss_drops_everything() {
        let medium = SimulatedMedium::with_seed(7);
        let (a, mut rx_a) = medium.join();
        let (_b, mut rx_b) = medium.join();
        medium.connect_all(-50);
        medium.set_loss_rate(1.0);

        a.send(Bytes::from_static(b"x")).unwrap();
        assert!(rx_b.try_recv().is_err());
        assert!(rx_a.try_recv().is_err());
        assert_eq!(medium.stats().lost, 1);
    }

    #[test]
    fn test_mtu_and_departed_ports() {
        let medium = SimulatedMedium::with_seed(7);
        let (a, _rx) = medium.join();
        medium.set_mtu(Some(4));

        assert!(matches!(
            a.send(Bytes::from_static(b"too long")),
            Err(NetworkError::FrameTooLarge { size: 8, mtu: 4 })
        ));

        medium.leave(a.id());
        assert!(matches!(
            a.send(Bytes::from_static(b"x")),
            Err(NetworkError::MediumClosed)
        ));
    }

    #[test]
    fn test_chain_topology() {
        let medium = SimulatedMedium::with_seed(7);
        for _ in 0..3 {
            let _ = medium.join();
        }
        medium.chain(&[0, 1, 2], -70);
        assert!(medium.is_linked(1, 0));
        assert!(medium.is_linked(1, 2));
        assert!(!medium.is_linked(0, 2));
    }
}
