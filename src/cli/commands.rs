//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::model::ObjectKey;

/// appinstance - keeps every `AppInstance` at its desired number of units.
#[derive(Parser, Debug)]
#[command(name = "appinstance")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "APPINSTANCE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter configuration file.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the operator configuration.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Run the controller until interrupted.
    Run {
        /// Only reconcile instances in this namespace.
        #[arg(short, long)]
        namespace: Option<String>,

        /// Number of concurrent workers.
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Run a single reconciliation pass for one instance.
    Reconcile {
        /// Instance key (`namespace/name` or `name`).
        instance: ObjectKey,
    },

    /// Show what a reconciliation pass would do, without doing it.
    Plan {
        /// Instance key (`namespace/name` or `name`).
        instance: ObjectKey,
    },

    /// Show instances with their desired and observed units.
    Status {
        /// Instance key; all instances if omitted.
        instance: Option<ObjectKey>,

        /// Only list instances in this namespace.
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Create an instance or change its desired size.
    Apply {
        /// Instance key (`namespace/name` or `name`).
        instance: ObjectKey,

        /// Desired number of units.
        #[arg(short, long)]
        size: u32,

        /// Reconcile right away instead of waiting for the controller.
        #[arg(long)]
        reconcile: bool,
    },

    /// Delete an instance; its units are garbage collected.
    Delete {
        /// Instance key (`namespace/name` or `name`).
        instance: ObjectKey,
    },

    /// List the units of an instance.
    Units {
        /// Instance key (`namespace/name` or `name`).
        instance: ObjectKey,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log line format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per log line.
    Json,
}
