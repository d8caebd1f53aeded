//! CLI module
//!
//! Command-line interface for running migrations.
//!
//! # Commands
//!
//! - `resume` - Run the checkpointed migration
//! - `transfer` - One-shot copy of every record
//! - `status` - Resume point and remaining count
//! - `check` - Reach both stores
//! - `run` - Whichever mode the configuration names

mod commands;
mod runner;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::{build_engine, Runner};
