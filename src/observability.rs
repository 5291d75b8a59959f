//! Tracing subscriber setup.

use crate::error::{GatewayError, Result};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over `level` when set.
pub fn init_tracing(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| GatewayError::Config(format!("Invalid log level '{}': {}", level, e)))?,
    };

    fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .try_init()
        .map_err(|_| GatewayError::Config("Logging already initialized".to_string()))
}
