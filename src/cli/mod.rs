//! Command-line interface for alpha_forge.
//!
//! Provides the `run` and `config` commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
