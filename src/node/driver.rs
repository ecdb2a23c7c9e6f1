//! Event loop for one node
//!
//! Inbound frames, the maintenance tick and relay timers all run on one
//! tokio task, so the receive path and maintenance never interleave.

use crate::network::InboundFrame;
use crate::node::mesh::MeshNode;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Owner of a running node task
pub struct NodeHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl NodeHandle {
    /// Stop the loop and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub fn spawn(node: Arc<MeshNode>, inbound: mpsc::UnboundedReceiver<InboundFrame>) -> NodeHandle {
    let (shutdown, rx) = watch::channel(false);
    let task = tokio::spawn(run(node, inbound, rx));
    NodeHandle { shutdown, task }
}

pub async fn run(
    node: Arc<MeshNode>,
    mut inbound: mpsc::UnboundedReceiver<InboundFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(node.config().tick_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut relay_poll = interval(node.config().relay_poll());
    relay_poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(device = %node.config().device_id, "mesh node started");

    loop {
        tokio::select! {
            frame = inbound.recv() => match frame {
                Some(frame) => {
                    node.handle_frame(frame);
                }
                None => {
                    info!("inbound channel closed");
                    break;
                }
            },
            _ = tick.tick() => {
                let report = node.tick();
                debug!(?report, "maintenance tick");
            }
            _ = relay_poll.tick() => {
                node.flush_relays();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(device = %node.config().device_id, stats = %node.stats(), "mesh node stopped");
}
