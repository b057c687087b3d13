// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `workgraph`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "workgraph",
    version,
    about = "Schedule and execute shell-command workflow graphs.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WORKGRAPH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Start the orchestration server.
    Serve {
        /// Graph file whose workspace is pre-registered at startup.
        ///
        /// Further workspaces can be opened by clients posting their graph
        /// file path on `/client-connect`.
        #[arg(value_name = "FILE")]
        file: Option<String>,

        /// Interface to bind.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind. Exits with code 2 if already bound.
        #[arg(long, default_value_t = 7077)]
        port: u16,

        /// Exit the process once no workspaces remain open.
        #[arg(long)]
        exit_when_idle: bool,

        /// Seconds an HTTP handler waits for its mutation to apply.
        #[arg(long, default_value_t = 10)]
        mutation_timeout_secs: u64,
    },

    /// Run a workflow against a running server, executing ready nodes locally.
    Run {
        /// Graph file identifying the workspace.
        #[arg(value_name = "FILE")]
        file: String,

        /// Server host.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Server port.
        #[arg(long, default_value_t = 7077)]
        port: u16,

        /// Restrict the run to these node ids (subset run).
        #[arg(long, value_name = "ID")]
        nodes: Vec<String>,

        /// Wrapper command template; `{}` is replaced with the quoted label.
        #[arg(long, value_name = "TEMPLATE")]
        wrapper: Option<String>,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// The `EnvFilter` directive this level stands for.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
