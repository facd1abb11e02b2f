// src/job/config.rs

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::envfile::Env;
use crate::job::predicate::Predicate;

/// When to invoke the notifier after a job completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyMode {
    Always,
    Never,
    #[default]
    OnFailure,
}

impl FromStr for NotifyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(NotifyMode::Always),
            "never" => Ok(NotifyMode::Never),
            "on-failure" | "" => Ok(NotifyMode::OnFailure),
            other => Err(format!("unknown notify mode: {other}")),
        }
    }
}

impl fmt::Display for NotifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotifyMode::Always => "always",
            NotifyMode::Never => "never",
            NotifyMode::OnFailure => "on-failure",
        };
        f.write_str(s)
    }
}

/// An immutable job definition produced by loading one `config.star`.
///
/// Replaced wholesale in the job store on reload; a job already sitting in a
/// queue keeps the snapshot it was enqueued with.
#[derive(Clone)]
pub struct JobConfig {
    pub name: String,
    pub command: Vec<String>,
    pub env: Env,
    pub enabled: bool,
    pub log: bool,
    pub queue: String,
    pub duplicate: bool,
    pub jitter: Duration,
    pub notify_mode: NotifyMode,
    pub should_run: Option<Arc<dyn Predicate>>,
}

impl JobConfig {
    /// A job with the given name and the documented defaults. The loader
    /// fills in whatever the module assigns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: Vec::new(),
            env: Env::new(),
            enabled: true,
            log: true,
            queue: String::new(),
            duplicate: false,
            jitter: Duration::ZERO,
            notify_mode: NotifyMode::OnFailure,
            should_run: None,
        }
    }

    /// The queue this job runs in; defaults to the job's own name.
    pub fn queue_name(&self) -> &str {
        if self.queue.is_empty() {
            &self.name
        } else {
            &self.queue
        }
    }
}

impl fmt::Debug for JobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobConfig")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("enabled", &self.enabled)
            .field("log", &self.log)
            .field("queue", &self.queue_name())
            .field("duplicate", &self.duplicate)
            .field("jitter", &self.jitter)
            .field("notify_mode", &self.notify_mode)
            .field("should_run", &self.should_run.is_some())
            .finish_non_exhaustive()
    }
}

/// Record of one finished run, as persisted in the completion store.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedJob {
    pub error: String,
    pub exit_status: i32,
    pub started: DateTime<Local>,
    pub finished: DateTime<Local>,
}

impl CompletedJob {
    pub fn is_success(&self) -> bool {
        self.exit_status == 0 && self.error.is_empty()
    }
}
