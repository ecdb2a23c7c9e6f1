#![allow(dead_code)]

use meshrelay::clock::ManualClock;
use meshrelay::network::{InboundFrame, SimulatedMedium};
use meshrelay::node::{MeshConfig, MeshConfigBuilder, MeshNode, Received};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Time that passes between pump rounds; covers jitter and relay spacing
const ROUND: Duration = Duration::from_millis(200);
const MAX_ROUNDS: usize = 200;

pub struct Mesh {
    pub clock: Arc<ManualClock>,
    pub medium: Arc<SimulatedMedium>,
    pub nodes: Vec<Arc<MeshNode>>,
    inboxes: Vec<UnboundedReceiver<InboundFrame>>,
    /// Every receive outcome, per node
    pub outcomes: Vec<Vec<Received>>,
}

impl Mesh {
    pub fn new(count: usize) -> Self {
        Self::with_config(count, |b| b)
    }

    /// `configure` adjusts each node's config; device ids are `n0`, `n1`, ...
    pub fn with_config(count: usize, configure: impl Fn(MeshConfigBuilder) -> MeshConfigBuilder) -> Self {
        let clock = ManualClock::new(1_700_000_000_000);
        let medium = SimulatedMedium::with_seed(11);
        let mut nodes = Vec::with_capacity(count);
        let mut inboxes = Vec::with_capacity(count);

        for index in 0..count {
            let (port, inbox) = medium.join();
            let builder = MeshConfig::builder()
                .device_id(format!("n{index}"))
                .heartbeat_interval(Duration::ZERO);
            let node = MeshNode::builder(configure(builder).build())
                .clock(clock.clone())
                .transport(Arc::new(port))
                .relay_seed(index as u64)
                .build()
                .expect("node builds");
            nodes.push(node);
            inboxes.push(inbox);
        }

        Self {
            clock,
            medium,
            nodes,
            inboxes,
            outcomes: vec![Vec::new(); count],
        }
    }

    pub fn line(count: usize) -> Self {
        let mesh = Self::new(count);
        mesh.medium.chain(&(0..count).collect::<Vec<_>>(), -70);
        mesh
    }

    pub fn full(count: usize) -> Self {
        let mesh = Self::new(count);
        mesh.medium.connect_all(-50);
        mesh
    }

    pub fn node(&self, index: usize) -> &Arc<MeshNode> {
        &self.nodes[index]
    }

    /// Feed every queued frame to its node once. Returns frames handled.
    pub fn deliver_pending(&mut self) -> usize {
        let mut handled = 0;
        for (index, inbox) in self.inboxes.iter_mut().enumerate() {
            while let Ok(frame) = inbox.try_recv() {
                let outcome = self.nodes[index].handle_frame(frame);
                self.outcomes[index].push(outcome);
                handled += 1;
            }
        }
        handled
    }

    /// Pump frames and relays until nothing is in flight
    pub fn settle(&mut self) {
        for _ in 0..MAX_ROUNDS {
            let handled = self.deliver_pending();
            self.clock.advance(ROUND);
            let relayed: usize = self.nodes.iter().map(|n| n.flush_relays()).sum();
            let queued: usize = self.nodes.iter().map(|n| n.stats().queued_relays).sum();
            if handled == 0 && relayed == 0 && queued == 0 {
                return;
            }
        }
        panic!("mesh did not settle");
    }

    /// Advance time and run one maintenance tick on every node
    pub fn tick_all(&mut self, by: Duration) {
        self.clock.advance(by);
        for node in &self.nodes {
            node.tick();
        }
    }

    /// Drop frames already on the air
    pub fn discard_pending(&mut self) {
        for inbox in &mut self.inboxes {
            while inbox.try_recv().is_ok() {}
        }
    }
}
