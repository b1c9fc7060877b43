//! Command-line interface for songbatch.
//!
//! Provides the create, poll, run and status commands.

mod commands;

pub use commands::{parse_cli, run, run_create, run_poll, run_with_cli, Cli, Commands};
