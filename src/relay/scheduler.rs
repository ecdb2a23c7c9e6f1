//! Flood relay scheduling
//!
//! Decides whether and when a received packet is re-broadcast. Emergency
//! and heartbeat traffic always goes out immediately; everything else is
//! throttled by a sliding congestion window, a hard minimum spacing and a
//! small random jitter that keeps neighbors from relaying in lockstep.

use crate::clock::{duration_ms, Clock, Millis};
use crate::metrics::recorder;
use crate::protocol::{Packet, Priority};
use crate::relay::route_cache::RouteCache;
use crate::relay::types::{RelayConfig, RelayDecision, RelayReason, RelayStats, RouteHint};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Default)]
struct RelayWindow {
    /// Relay timestamps inside the congestion window, oldest first
    recent: VecDeque<Millis>,
    last_relay: Option<Millis>,
}

impl RelayWindow {
    fn trim(&mut self, now: Millis, window_ms: Millis) {
        while let Some(&oldest) = self.recent.front() {
            if now.saturating_sub(oldest) > window_ms {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }
}

pub struct RelayScheduler {
    config: RelayConfig,
    clock: Arc<dyn Clock>,
    window: Mutex<RelayWindow>,
    routes: Mutex<RouteCache>,
    reachable_peers: AtomicUsize,
    rng: Mutex<StdRng>,
    decisions: AtomicU64,
    suppressed: AtomicU64,
    relayed: AtomicU64,
}

impl RelayScheduler {
    pub fn new(config: RelayConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_rng(config, clock, StdRng::from_entropy())
    }

    /// Deterministic jitter for tests and simulations
    pub fn with_seed(config: RelayConfig, clock: Arc<dyn Clock>, seed: u64) -> Self {
        Self::with_rng(config, clock, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: RelayConfig, clock: Arc<dyn Clock>, rng: StdRng) -> Self {
        Self {
            routes: Mutex::new(RouteCache::new(config.route_cache_capacity)),
            config,
            clock,
            window: Mutex::new(RelayWindow::default()),
            reachable_peers: AtomicUsize::new(0),
            rng: Mutex::new(rng),
            decisions: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            relayed: AtomicU64::new(0),
        }
    }

    /// Neighbor count as last reported by the node
    pub fn set_reachable_peers(&self, count: usize) {
        self.reachable_peers.store(count, Ordering::Relaxed);
    }

    pub fn reachable_peers(&self) -> usize {
        self.reachable_peers.load(Ordering::Relaxed)
    }

    pub fn decide_relay(&self, packet: &Packet) -> RelayDecision {
        let decision = self.evaluate(packet);
        self.decisions.fetch_add(1, Ordering::Relaxed);

        if decision.should_relay {
            recorder::record_relay(decision.reason);
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            recorder::record_relay_suppressed(decision.reason);
        }
        trace!(
            message_id = packet.header.message_id,
            relay = decision.should_relay,
            delay_ms = decision.delay_ms,
            reason = %decision.reason,
            "relay decision"
        );
        decision
    }

    fn evaluate(&self, packet: &Packet) -> RelayDecision {
        let priority = packet.priority();
        if priority == Priority::Critical || packet.kind().is_heartbeat() {
            return RelayDecision::relay(0, RelayReason::CriticalPriority);
        }

        let now = self.clock.now_ms();
        let min_interval = duration_ms(self.config.min_relay_interval);

        let (congestion, since_last) = {
            let mut window = self.window.lock();
            window.trim(now, duration_ms(self.config.congestion_window));
            (
                window.recent.len(),
                window.last_relay.map(|t| now.saturating_sub(t)),
            )
        };

        if congestion > self.config.congestion_threshold {
            let delay = min_interval + congestion as u64 * backoff_step_ms(priority);
            return RelayDecision::relay(clamp_ms(delay), RelayReason::CongestionBackoff);
        }

        if let Some(elapsed) = since_last.filter(|e| *e < min_interval) {
            return RelayDecision::relay(clamp_ms(min_interval - elapsed), RelayReason::RateLimited);
        }

        if self.reachable_peers() == 0 {
            return RelayDecision::drop(RelayReason::NoPeers);
        }

        let jitter_max = duration_ms(self.config.jitter_max);
        let jitter = if jitter_max == 0 {
            0
        } else {
            self.rng.lock().gen_range(0..jitter_max)
        };
        RelayDecision::relay(clamp_ms(jitter), RelayReason::Jitter)
    }

    /// Note that a relay went out now
    pub fn record_relay(&self) {
        let now = self.clock.now_ms();
        let mut window = self.window.lock();
        window.recent.push_back(now);
        window.trim(now, duration_ms(self.config.congestion_window));
        window.last_relay = Some(now);
        self.relayed.fetch_add(1, Ordering::Relaxed);
    }

    /// Relays inside the current window
    pub fn congestion(&self) -> usize {
        let now = self.clock.now_ms();
        let mut window = self.window.lock();
        window.trim(now, duration_ms(self.config.congestion_window));
        window.recent.len()
    }

    pub fn record_route(&self, destination: u32, hint: RouteHint) {
        self.routes.lock().record(destination, hint);
    }

    pub fn route_for(&self, destination: u32) -> Option<RouteHint> {
        self.routes.lock().get(destination).copied()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            decisions: self.decisions.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            congestion: self.congestion(),
            cached_routes: self.routes.lock().len(),
        }
    }
}

/// Per-relay backoff under congestion, steeper for less important traffic
fn backoff_step_ms(priority: Priority) -> u64 {
    match priority {
        Priority::Critical => 0,
        Priority::High => 10,
        Priority::Normal => 20,
        Priority::Low | Priority::Relay => 50,
    }
}

fn clamp_ms(ms: u64) -> u32 {
    ms.min(u64::from(u32::MAX)) as u32
}
