// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `mandelhost`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "mandelhost",
    version,
    about = "Drive mandelbox tasks and their containers on this host.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the agent config file (TOML).
    ///
    /// Default: `Mandelhost.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Mandelhost.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `MANDELHOST_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the task manifests, but don't start anything.
    #[arg(long)]
    pub dry_run: bool,
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

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
