// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::paths::DEFAULT_LOG_LINES;

/// Command-line arguments for `regular`.
#[derive(Debug, Clone, Parser)]
#[command(name = "regular", version, about = "Run regular jobs.")]
pub struct Cli {
    /// Path to the config directory.
    #[arg(short = 'c', long, value_name = "DIR", global = true)]
    pub config_root: Option<PathBuf>,

    /// Path to the state directory.
    #[arg(short = 's', long, value_name = "DIR", global = true)]
    pub state_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List available jobs.
    List,

    /// Show application log.
    Log {
        /// Number of log lines to show.
        #[arg(short = 'l', long, default_value_t = DEFAULT_LOG_LINES)]
        log_lines: usize,
    },

    /// Run jobs once.
    Run {
        /// Run jobs regardless of schedule.
        #[arg(short, long)]
        force: bool,

        /// Job names to run (all jobs if none specified).
        job_names: Vec<String>,
    },

    /// Start the scheduler.
    Start,

    /// Show job status.
    Status {
        /// Number of log lines to show.
        #[arg(short = 'l', long, default_value_t = DEFAULT_LOG_LINES)]
        log_lines: usize,

        /// Jobs to show status for (all jobs if none specified).
        job_names: Vec<String>,
    },
}

/// Convenience wrapper around `Cli::parse()`.
pub fn parse() -> Cli {
    Cli::parse()
}
