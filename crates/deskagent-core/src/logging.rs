//! Tracing setup for hosts that embed the adapters.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is the host's decision.  These helpers cover the common cases.

use tracing_subscriber::EnvFilter;

/// Initialize a compact subscriber honoring `RUST_LOG`, falling back to
/// `default_level`.  Returns `false` if a global subscriber already exists.
pub fn init_tracing(default_level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_target(false)
        .compact()
        .try_init()
        .is_ok()
}

/// Initialize a JSON subscriber for log shipping.
pub fn init_json_tracing(default_level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .json()
        .try_init()
        .is_ok()
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}
