//! Prometheus exporter
//!
//! One global recorder per process. [`start_metrics_server`] also binds a
//! scrape endpoint; [`install_recorder`] keeps metrics in memory for
//! [`render_metrics`].

use crate::metrics::recorder::init_metrics;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::{info, warn};

pub const DEFAULT_METRICS_PORT: u16 = 9464;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_METRICS_PORT)),
        }
    }
}

impl MetricsConfig {
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self { listen_addr: addr }
    }
}

/// Install the recorder and serve `/metrics` on `config.listen_addr`.
///
/// Needs a tokio runtime. A second call returns the first handle.
pub fn start_metrics_server(
    config: MetricsConfig,
) -> Result<&'static PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .build()
        .map_err(|e| MetricsError::SetupFailed(e.to_string()))?;

    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).map_err(|_| MetricsError::AlreadyInitialized)?;
    init_metrics();

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            warn!(error = ?e, "metrics exporter stopped");
        }
    });

    info!(addr = %config.listen_addr, "metrics exporter listening");
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Install the recorder without a listener
pub fn install_recorder() -> Result<&'static PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::SetupFailed(e.to_string()))?;
    init_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Current metrics in the Prometheus text format, if a recorder is installed
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to setup metrics: {0}")]
    SetupFailed(String),

    #[error("Metrics already initialized")]
    AlreadyInitialized,
}
