// src/runner/queue.rs

use std::collections::VecDeque;

use crate::job::config::JobConfig;

/// One serialization domain.
///
/// `active` is true exactly while a worker is executing a job drawn from
/// this queue. The running job stays at the front of `jobs` until its
/// completion record has been committed, so observers see it there.
#[derive(Debug, Default)]
pub struct JobQueue {
    pub active: bool,
    pub jobs: VecDeque<JobConfig>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}
