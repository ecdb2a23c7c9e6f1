//! `tracing` subscriber setup
//!
//! Level comes from `RUST_LOG`, falling back to `info`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Human-readable output for terminals
///
/// ```no_run
/// meshrelay::logging::init();
/// tracing::info!("node starting");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_target(true))
        .init();
}

/// One JSON object per event, for log collectors
pub fn init_json() {
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Like [`init`] but a no-op if a subscriber is already installed
pub fn try_init() -> bool {
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_init_is_idempotent() {
        try_init();
        assert!(!try_init());
    }
}
