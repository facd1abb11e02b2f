// src/errors.rs

//! Crate-wide error kinds.
//!
//! Job-attributed variants carry the job name and render with a `[<job>]`
//! prefix so log lines can be traced back to the job that produced them.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegularError {
    #[error("[{job}] config error: {message}")]
    Config { job: String, message: String },

    #[error("[{job}] predicate error: {message}")]
    Predicate { job: String, message: String },

    #[error("failed to find job to remove: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("[{job}] {message}")]
    Subprocess { job: String, message: String },

    #[error("another instance is already running")]
    AlreadyRunning,

    #[error("watcher error: {0}")]
    Watcher(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for RegularError {
    fn from(err: rusqlite::Error) -> Self {
        RegularError::Storage(err.to_string())
    }
}

impl RegularError {
    /// Job name for job-attributed errors, if any.
    pub fn job_name(&self) -> Option<&str> {
        match self {
            RegularError::Config { job, .. }
            | RegularError::Predicate { job, .. }
            | RegularError::Subprocess { job, .. } => Some(job),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RegularError>;
