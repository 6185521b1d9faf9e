//! Command-line interface for content-forge.
//!
//! Provides commands to run content-activity and video jobs, inspect stored
//! jobs and resume interrupted ones.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
