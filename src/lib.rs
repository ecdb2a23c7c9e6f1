//! Reliability layer for an infrastructure-free broadcast mesh.
//!
//! Devices exchange small binary frames over a BLE-class radio. This crate
//! covers the part that makes delivery dependable on such a medium:
//!
//! - `protocol`: the 13-byte wire header and typed payloads
//! - `mailbox`: store-and-forward queues per destination
//! - `delivery`: ACK tracking and retry bookkeeping
//! - `relay`: flood relay decisions with congestion backoff
//! - `ledger`: externally visible message status and dedup
//! - `node`: the composition root and its event loop

pub mod clock;
pub mod dedup;
pub mod delivery;
pub mod events;
pub mod ledger;
pub mod logging;
pub mod mailbox;
pub mod metrics;
pub mod network;
pub mod node;
pub mod persistence;
pub mod protocol;
pub mod relay;

pub use node::{MeshConfig, MeshNode, MeshNodeBuilder};
pub use protocol::{MessageType, Packet, PacketCodec, Priority};
