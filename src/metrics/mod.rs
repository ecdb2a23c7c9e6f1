//! Metrics and observability module
//!
//! Prometheus-compatible metrics for a mesh node.
//!
//! Key metrics exposed:
//! - Receive path health (decoded, malformed, duplicate frames)
//! - Capacity pressure (mailbox and pending-ACK evictions, expiry)
//! - Delivery outcomes (ACKs, retransmissions, failures, ACK latency)
//! - Relay decisions by reason

pub mod exporter;
pub mod recorder;

pub use exporter::{
    install_recorder, render_metrics, start_metrics_server, MetricsConfig, MetricsError,
    DEFAULT_METRICS_PORT,
};
pub use recorder::init_metrics;
