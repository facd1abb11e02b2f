// src/commands/mod.rs

//! Bodies of the one-shot CLI commands: `run`, `status`, `log`, `list`.

pub mod status;

use std::collections::VecDeque;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use tracing::warn;

use crate::db::AppDb;
use crate::errors::Result;
use crate::job::store::JobStore;
use crate::notifier::{LogNotifier, Notifier};
use crate::paths::{self, APP_LOG_FILE_NAME, JOB_CONFIG_FILE_NAME};
use crate::runner::JobRunner;
use crate::scheduler::Scheduler;

pub use status::status;

/// Load the named jobs (all jobs when `job_names` is empty), enqueue the
/// ones that are due (or all of them with `force`), and drain the queues.
pub async fn run(
    config_root: &Path,
    state_root: &Path,
    force: bool,
    job_names: &[String],
) -> Result<()> {
    paths::create_private_dir(state_root)?;

    let db = Arc::new(AppDb::open(state_root)?);
    let store = Arc::new(JobStore::new());
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new(Arc::clone(&db)));
    let runner = Arc::new(JobRunner::new(Arc::clone(&db), notifier, state_root));
    let scheduler = Scheduler::new(Arc::clone(&store), Arc::clone(&runner), Arc::clone(&db));

    let names = if job_names.is_empty() {
        job_dir_names(config_root)?
    } else {
        job_names.to_vec()
    };

    let now = Local::now();

    for job_name in &names {
        let config_path = config_root.join(job_name).join(JOB_CONFIG_FILE_NAME);

        let job = match store.update(config_root, &config_path) {
            Ok((_, job)) => job,
            Err(err) => {
                warn!(job = %job_name, "error loading job: {err}");
                continue;
            }
        };

        if force {
            runner.enqueue(job);
        } else if let Err(err) = scheduler.schedule_job(&job, now) {
            warn!(job = %job_name, "scheduling error: {err}");
        }
    }

    runner.drain().await
}

/// Print the last `log_lines` lines of the application log.
pub fn log(state_root: &Path, log_lines: usize) -> Result<()> {
    let path = state_root.join(APP_LOG_FILE_NAME);

    let file = match std::fs::File::open(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            println!("Log is empty");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    // Keep only the tail in memory.
    let mut lines: VecDeque<String> = VecDeque::with_capacity(log_lines + 1);
    for line in std::io::BufReader::new(file).lines() {
        lines.push_back(line?);

        if lines.len() > log_lines {
            lines.pop_front();
        }
    }

    if lines.is_empty() {
        println!("Log is empty");
        return Ok(());
    }

    for line in lines {
        println!("{line}");
    }

    Ok(())
}

/// Print the names of all configured jobs.
pub fn list(config_root: &Path) -> Result<()> {
    for name in job_dir_names(config_root)? {
        println!("{name}");
    }

    Ok(())
}

/// Directories under the config root that contain a job config file.
pub fn job_dir_names(config_root: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();

    for entry in std::fs::read_dir(config_root)? {
        let entry = entry?;

        if !entry.file_type()?.is_dir() {
            continue;
        }

        if entry.path().join(JOB_CONFIG_FILE_NAME).is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    names.sort();
    Ok(names)
}
