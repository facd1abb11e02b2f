// src/lib.rs

pub mod cli;
pub mod commands;
pub mod db;
pub mod envfile;
pub mod errors;
pub mod job;
pub mod logging;
pub mod notifier;
pub mod paths;
pub mod runner;
pub mod scheduler;
pub mod service;
pub mod shellquote;
pub mod watch;

use crate::cli::{Cli, Command};
use crate::errors::Result;

/// High-level entry point used by `main.rs`.
///
/// Resolves the config and state roots, creates them if needed, sets up
/// logging, and dispatches to the selected command.
pub async fn run(args: Cli) -> Result<()> {
    let config_root = args
        .config_root
        .clone()
        .unwrap_or_else(paths::default_config_root);
    let state_root = args
        .state_root
        .clone()
        .unwrap_or_else(paths::default_state_root);

    paths::create_private_dir(&config_root)?;
    paths::create_private_dir(&state_root)?;

    logging::init_logging(&state_root)?;

    match args.command {
        Command::List => commands::list(&config_root),
        Command::Log { log_lines } => commands::log(&state_root, log_lines),
        Command::Run { force, job_names } => {
            commands::run(&config_root, &state_root, force, &job_names).await
        }
        Command::Start => service::run_service(&config_root, &state_root).await,
        Command::Status {
            log_lines,
            job_names,
        } => commands::status(&config_root, &state_root, log_lines, &job_names),
    }
}
