// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The subscriber filter comes from, in order: the `--log-level` CLI flag,
//! the `WORKGRAPH_LOG` environment variable (full `EnvFilter` directives,
//! e.g. `debug` or `workgraph::engine=trace`), or `info`. Logs go to STDERR
//! so stdout stays free for command output.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

/// Initialise the global subscriber. Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(level.as_directive()),
        None => EnvFilter::try_from_env("WORKGRAPH_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info")),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
