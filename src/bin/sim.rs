//! In-process mesh simulation
//!
//! Usage: `meshrelay-sim [config.json]`
//!
//! Builds a line or full-mesh topology on a lossy simulated medium, has the
//! first node send text messages to the last one plus one SOS broadcast,
//! then reports what was delivered.

use anyhow::{ensure, Context, Result};
use meshrelay::metrics::{start_metrics_server, MetricsConfig};
use meshrelay::network::SimulatedMedium;
use meshrelay::node::{spawn, MeshConfig, MeshNode};
use meshrelay::protocol::SosPayload;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Topology {
    Line,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct SimConfig {
    nodes: usize,
    topology: Topology,
    loss_rate: f64,
    messages: usize,
    message_interval_ms: u64,
    duration_secs: u64,
    seed: u64,
    metrics_addr: Option<SocketAddr>,
    /// Template applied to every node; `device_id` is replaced
    node: MeshConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            nodes: 5,
            topology: Topology::Line,
            loss_rate: 0.1,
            messages: 10,
            message_interval_ms: 200,
            duration_secs: 15,
            seed: 7,
            metrics_addr: None,
            node: MeshConfig::builder()
                .ack_timeout(Duration::from_secs(2))
                .tick_interval(Duration::from_millis(250))
                .heartbeat_interval(Duration::from_secs(1))
                .build(),
        }
    }
}

impl SimConfig {
    fn load(path: Option<&str>) -> Result<Self> {
        let config: SimConfig = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {path}"))?;
                serde_json::from_str(&contents).with_context(|| format!("parsing {path}"))?
            }
            None => SimConfig::default(),
        };
        ensure!(config.nodes >= 2, "need at least two nodes");
        ensure!(
            (0.0..=1.0).contains(&config.loss_rate),
            "loss_rate must be within [0, 1]"
        );
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    meshrelay::logging::init();

    let path = std::env::args().nth(1);
    let sim = SimConfig::load(path.as_deref())?;
    info!(topology = ?sim.topology, nodes = sim.nodes, loss = sim.loss_rate, "starting simulation");

    if let Some(addr) = sim.metrics_addr {
        start_metrics_server(MetricsConfig::with_addr(addr))?;
    }

    let medium = SimulatedMedium::with_seed(sim.seed);
    medium.set_loss_rate(sim.loss_rate);

    let mut nodes = Vec::with_capacity(sim.nodes);
    let mut handles = Vec::with_capacity(sim.nodes);
    for index in 0..sim.nodes {
        let (port, inbound) = medium.join();
        let mut config = sim.node.clone();
        config.device_id = format!("sim-{index}");

        let node = MeshNode::builder(config)
            .transport(Arc::new(port))
            .relay_seed(sim.seed.wrapping_add(index as u64))
            .build()
            .with_context(|| format!("building node {index}"))?;
        handles.push(spawn(node.clone(), inbound));
        nodes.push(node);
    }

    match sim.topology {
        Topology::Line => medium.chain(&(0..sim.nodes).collect::<Vec<_>>(), -70),
        Topology::Full => medium.connect_all(-55),
    }

    let delivered = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let sender = nodes[0].clone();
    let counter = delivered.clone();
    sender.on_message_delivered(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    let counter = failed.clone();
    sender.on_delivery_failed(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    // Let heartbeats populate neighbor tables
    tokio::time::sleep(Duration::from_secs(1)).await;

    let target = format!("sim-{}", sim.nodes - 1);
    for n in 0..sim.messages {
        sender.send_text(&target, &format!("message {n}"));
        tokio::time::sleep(Duration::from_millis(sim.message_interval_ms)).await;
    }
    sender.send_sos(&SosPayload {
        lat: 40.98,
        lon: 28.87,
        status: 1,
    });

    tokio::time::sleep(Duration::from_secs(sim.duration_secs)).await;

    for handle in handles {
        handle.shutdown().await;
    }

    println!("\nSimulation results");
    println!("==================");
    println!("Messages sent:      {}", sim.messages + 1);
    println!("ACKed:              {}", delivered.load(Ordering::Relaxed));
    println!("Failed:             {}", failed.load(Ordering::Relaxed));
    let stats = medium.stats();
    println!(
        "Medium:             {} frames, {} deliveries, {} lost",
        stats.sent, stats.delivered, stats.lost
    );
    for node in &nodes {
        println!("{:<8} {}", node.config().device_id, node.stats());
    }
    Ok(())
}
