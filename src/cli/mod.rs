//! CLI module for the `appinstance` binary.
//!
//! This module provides the command-line interface for running the
//! controller and managing instances by hand.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat};
pub use output::OutputFormatter;
