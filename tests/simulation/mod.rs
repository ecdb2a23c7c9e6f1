//! Deterministic multi-node harness
//!
//! All nodes share one manual clock and one simulated medium. Frames are
//! pumped by hand, so tests control exactly when time passes.

pub mod harness;

pub use harness::Mesh;
