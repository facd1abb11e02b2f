// src/notifier.rs

//! Completion notifications.
//!
//! The core decides *whether* to notify from the job's notify mode; what a
//! notification looks like is up to the [`Notifier`] implementation. The
//! default one writes a summary with recent log tails to the application
//! log. Notifier errors are reported but never fail a run.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::db::AppDb;
use crate::job::config::{CompletedJob, NotifyMode};

const NOTIFY_LOG_LINES: usize = 10;

pub trait Notifier: Send + Sync {
    fn notify(&self, job_name: &str, completed: &CompletedJob) -> Result<()>;
}

/// Apply the notify-mode gate and call the notifier when it passes.
pub fn notify_if_needed(
    notifier: &dyn Notifier,
    mode: NotifyMode,
    job_name: &str,
    completed: &CompletedJob,
) -> Result<()> {
    let should_notify = match mode {
        NotifyMode::Never => false,
        NotifyMode::Always => true,
        NotifyMode::OnFailure => !completed.is_success(),
    };

    if !should_notify {
        return Ok(());
    }

    notifier.notify(job_name, completed)
}

/// Notifier that reports through the application log.
pub struct LogNotifier {
    db: Arc<AppDb>,
}

impl LogNotifier {
    pub fn new(db: Arc<AppDb>) -> Self {
        Self { db }
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, job_name: &str, completed: &CompletedJob) -> Result<()> {
        let (subject, body) = format_message(&self.db, job_name, completed)
            .context("failed to format notification message")?;

        if body.is_empty() {
            info!(job = %job_name, "{subject}");
        } else {
            info!(job = %job_name, "{subject}\n{body}");
        }

        Ok(())
    }
}

/// Subject and body for a completion notification, with the last few log
/// lines of each captured stream quoted in the body.
pub fn format_message(
    db: &AppDb,
    job_name: &str,
    completed: &CompletedJob,
) -> Result<(String, String)> {
    let subject = if completed.is_success() {
        format!("Job {job_name:?} succeeded")
    } else {
        format!("Job {job_name:?} failed")
    };

    let mut body = String::new();
    if !completed.error.is_empty() {
        body.push_str(&format!("Error: {}\n\n", completed.error));
    } else if completed.exit_status != 0 {
        body.push_str(&format!("Exit status: {}\n\n", completed.exit_status));
    }

    for stream_name in ["stdout", "stderr"] {
        let lines = db
            .job_logs(job_name, stream_name, NOTIFY_LOG_LINES)
            .context("error reading log")?;

        if lines.is_empty() {
            continue;
        }

        body.push_str(stream_name);
        body.push_str(":\n");

        for line in lines {
            body.push_str("> ");
            body.push_str(&line);
            body.push('\n');
        }
    }

    Ok((subject, body.trim_end().to_string()))
}
