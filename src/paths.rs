// src/paths.rs

//! Well-known file names, directory layout, and permission modes.
//!
//! The on-disk layout is a compatibility contract:
//!
//! - config root (default `$XDG_CONFIG_HOME/regular/`):
//!   `global.env`, `<job>/config.star`, `<job>/job.env`, `<job>/job`
//! - state root (default `$XDG_STATE_HOME/regular/`):
//!   `app.log`, `app.lock`, `state.sqlite3`, `<job>/stdout.log`,
//!   `<job>/stderr.log`

use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const APP_NAME: &str = "regular";

pub const JOB_CONFIG_FILE_NAME: &str = "config.star";
pub const JOB_ENV_FILE_NAME: &str = "job.env";
pub const GLOBAL_ENV_FILE_NAME: &str = "global.env";

pub const APP_LOG_FILE_NAME: &str = "app.log";
pub const APP_LOCK_FILE_NAME: &str = "app.lock";
pub const APP_DB_FILE_NAME: &str = "state.sqlite3";
pub const STDOUT_FILE_NAME: &str = "stdout.log";
pub const STDERR_FILE_NAME: &str = "stderr.log";

/// Name of the variable through which a job learns its own directory.
pub const JOB_DIR_ENV_VAR: &str = "JOB_DIR";

pub const DIR_MODE: u32 = 0o700;
pub const FILE_MODE: u32 = 0o600;

/// Default for the `-l` flag of `status` and `log`.
pub const DEFAULT_LOG_LINES: usize = 10;

/// Default config root: `$XDG_CONFIG_HOME/regular` (or `~/.config/regular`).
pub fn default_config_root() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default state root: `$XDG_STATE_HOME/regular` (or `~/.local/state/regular`).
pub fn default_state_root() -> PathBuf {
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("state")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// The job name is the basename of the directory holding the config file.
///
/// Works for any path inside the job directory: `.../foo/config.star`,
/// `.../foo/job.env`, and so on all map to `foo`.
pub fn job_name_from_path(path: &Path) -> String {
    path.parent()
        .and_then(|dir| dir.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Directory holding the given job config file.
pub fn job_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Create a directory tree with mode 0700, like the state and config roots.
pub fn create_private_dir(path: &Path) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(DIR_MODE)
        .create(path)
        .with_context(|| format!("creating directory {:?}", path))?;
    Ok(())
}
