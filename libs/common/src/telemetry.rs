//! Tracing setup shared by the service binaries

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber
///
/// Honors `RUST_LOG`; falls back to `info` when it is unset or invalid.
pub fn init_tracing(service: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("setting default subscriber failed: {}", e))?;

    info!(service, "Tracing initialized");
    Ok(())
}
