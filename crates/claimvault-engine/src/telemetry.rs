//! Process-wide `tracing` setup.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use claimvault_types::{ClaimvaultError, Result};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. With `json` every event
/// is one JSON object per line, fields included, which is what log
/// shippers expect; otherwise output is human-readable.
///
/// Conflict-rate alerts are emitted on target `claimvault::fraud`, so
/// `claimvault::fraud=warn` routes them independently.
///
/// # Errors
/// `Configuration` if the filter does not parse or a global subscriber is
/// already installed.
pub fn init_tracing(default_filter: &str, json: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter).map_err(|e| {
            ClaimvaultError::Configuration(format!("log filter {default_filter:?}: {e}"))
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    installed.map_err(|e| ClaimvaultError::Configuration(format!("tracing already initialized: {e}")))
}
