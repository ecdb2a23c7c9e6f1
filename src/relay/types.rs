//! Relay types and configuration

use crate::clock::Millis;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CONGESTION_THRESHOLD: usize = 10;
pub const CONGESTION_WINDOW: Duration = Duration::from_secs(1);
pub const MIN_RELAY_INTERVAL: Duration = Duration::from_millis(100);
pub const RELAY_JITTER_MAX: Duration = Duration::from_millis(50);
pub const ROUTE_CACHE_CAPACITY: usize = 100;

/// Why a relay decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelayReason {
    CriticalPriority,
    CongestionBackoff,
    RateLimited,
    NoPeers,
    Jitter,
}

impl RelayReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayReason::CriticalPriority => "critical_priority",
            RelayReason::CongestionBackoff => "congestion_backoff",
            RelayReason::RateLimited => "rate_limited",
            RelayReason::NoPeers => "no_peers",
            RelayReason::Jitter => "jitter",
        }
    }
}

impl std::fmt::Display for RelayReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether and when to re-broadcast a received packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayDecision {
    pub should_relay: bool,
    pub delay_ms: u32,
    pub reason: RelayReason,
}

impl RelayDecision {
    pub fn relay(delay_ms: u32, reason: RelayReason) -> Self {
        Self {
            should_relay: true,
            delay_ms,
            reason,
        }
    }

    pub fn drop(reason: RelayReason) -> Self {
        Self {
            should_relay: false,
            delay_ms: 0,
            reason,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.delay_ms))
    }
}

/// Configuration for the relay scheduler
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relays per window above which backoff kicks in
    pub congestion_threshold: usize,

    /// Length of the sliding congestion window
    pub congestion_window: Duration,

    /// Minimum spacing between two relays
    pub min_relay_interval: Duration,

    /// Upper bound (exclusive) of the desync jitter
    pub jitter_max: Duration,

    /// Advisory route cache size
    pub route_cache_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            congestion_threshold: CONGESTION_THRESHOLD,
            congestion_window: CONGESTION_WINDOW,
            min_relay_interval: MIN_RELAY_INTERVAL,
            jitter_max: RELAY_JITTER_MAX,
            route_cache_capacity: ROUTE_CACHE_CAPACITY,
        }
    }
}

/// Last thing heard from a source, kept for future routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteHint {
    /// Hops already consumed when the frame reached us
    pub hop_count: u8,
    pub q_score: u8,
    pub rssi: Option<i16>,
    pub observed_at: Millis,
}

/// Relay statistics
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub decisions: u64,
    pub suppressed: u64,
    pub relayed: u64,
    pub congestion: usize,
    pub cached_routes: usize,
}

impl std::fmt::Display for RelayStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Decisions: {}, Suppressed: {}, Relayed: {}, Window: {}, Routes: {}",
            self.decisions, self.suppressed, self.relayed, self.congestion, self.cached_routes
        )
    }
}
