//! Node composition root
//!
//! A [`MeshNode`] owns one instance of every reliability component and the
//! transport they share. [`driver::spawn`] runs it on a tokio task.

pub mod config;
pub mod driver;
pub mod error;
pub mod mesh;
pub mod types;

pub use config::{MeshConfig, MeshConfigBuilder};
pub use driver::{run, spawn, NodeHandle};
pub use error::{NodeError, NodeResult};
pub use mesh::{MeshNode, MeshNodeBuilder};
pub use types::{DeliveryFailed, Neighbor, NodeStats, Received, TickReport};
