//! Relay module for store-and-forward flooding
//!
//! Every node re-broadcasts novel packets until their hop budget runs out.
//! The scheduler here keeps that flood from saturating a shared,
//! low-bandwidth channel:
//!
//! - Emergency and heartbeat traffic is never delayed
//! - Bursts above the congestion threshold back off by priority
//! - Relays are spaced by a minimum interval
//! - Jitter desynchronizes neighbors hearing the same broadcast

pub mod route_cache;
pub mod scheduler;
pub mod types;

pub use route_cache::RouteCache;
pub use scheduler::RelayScheduler;
pub use types::{
    RelayConfig, RelayDecision, RelayReason, RelayStats, RouteHint, CONGESTION_THRESHOLD,
    CONGESTION_WINDOW, MIN_RELAY_INTERVAL, RELAY_JITTER_MAX, ROUTE_CACHE_CAPACITY,
};
