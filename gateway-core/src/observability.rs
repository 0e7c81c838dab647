//! Tracing/log initialization, matching every other gateway-shaped
//! binary: JSON-formatted `tracing-subscriber` output, level controlled by
//! `service.log_level` (and overridable via `RUST_LOG`).

use tracing_subscriber::EnvFilter;

use crate::{config::Config, error::Result};

/// Initialize the global tracing subscriber. Safe to call once per process;
/// a second call will return an error from `tracing`'s global dispatcher,
/// which callers should treat as a no-op during tests.
pub fn init_tracing(config: &Config) -> Result<()> {
    let log_level = config.service.log_level.clone();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Tracing initialized for service: {}", config.service.name);

    Ok(())
}

pub fn shutdown_tracing() {
    tracing::info!("Tracing shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_without_otlp() {
        let config = Config::default();
        let _ = init_tracing(&config);
    }
}
