// src/lib.rs

pub mod cli;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod logging;
pub mod runner;
pub mod server;
pub mod types;

use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use crate::cli::{CliArgs, Command};
use crate::server::app::{serve, ServeOptions};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - logging
/// - the workspace registry and HTTP/realtime surface (`serve`)
/// - the runner client (`run`)
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Serve {
            file,
            host,
            port,
            exit_when_idle,
            mutation_timeout_secs,
        } => {
            let options = ServeOptions {
                graph_file: file.map(PathBuf::from),
                host,
                port,
                exit_when_idle,
                mutation_timeout_secs,
            };
            serve(options).await
        }
        Command::Run {
            file,
            host,
            port,
            nodes,
            wrapper,
        } => {
            let client = runner::RunnerClient::new(&host, port, PathBuf::from(file), wrapper);
            info!(host = %host, port, "starting runner client");
            client.run(nodes).await
        }
    }
}
