//! Log output for the harness binary.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{LogFormat, LoggingConfig};

/// Filter from `RUST_LOG` when set and parseable, otherwise from `level`.
pub fn env_filter(level: &str) -> EnvFilter {
    std::env::var_os("RUST_LOG")
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level))
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_tracing(logging: &LoggingConfig) -> bool {
    let filter = env_filter(&logging.level);
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match logging.format {
        LogFormat::Full => registry
            .with(fmt::layer().with_target(logging.with_target))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(logging.with_target))
            .try_init(),
    };
    installed.is_ok()
}
