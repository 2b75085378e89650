//! Structured logging bootstrap (C0), initialised once before any other
//! component.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{Config, LogFormat};

/// Initialises the global `tracing` subscriber. The returned [`WorkerGuard`]
/// must be held for the lifetime of the process: dropping it flushes and
/// stops the non-blocking writer.
pub fn init_logging(config: &Config) -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_writer(non_blocking)
                .with_ansi(false);
            registry.with(layer).init();
        }
        LogFormat::Text => {
            let layer = fmt::layer()
                .with_target(false)
                .with_writer(non_blocking)
                .with_ansi(true);
            registry.with(layer).init();
        }
    }

    guard
}
