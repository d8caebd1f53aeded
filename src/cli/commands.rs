//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Checkpointed document migration between stores
#[derive(Parser, Debug)]
#[command(name = "docshift")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Migration configuration file (YAML)
    #[arg(short, long, global = true, default_value = "docshift.yaml")]
    pub config: PathBuf,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the checkpointed migration until nothing remains
    Resume,

    /// Copy every source record once, without markers
    Transfer,

    /// Show the resume point and remaining count
    Status,

    /// Validate the configuration and reach both stores
    Check,

    /// Run whichever mode the configuration names
    Run,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output (one message per line)
    Json,
    /// Human-readable output
    Pretty,
}
