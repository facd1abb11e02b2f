// src/runner/exec.rs

//! Per-queue job execution.
//!
//! Queues serialize: at most one job per queue runs at a time, in enqueue
//! order. The runner tick snapshots the queue names once a second and
//! dispatches each queue's head to its own task. The queue lock is never
//! held across the jitter sleep, the subprocess wait, or the store call.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use chrono::Local;
use rand::Rng;
use tokio::process::Command;
use tracing::{error, info};

use crate::db::AppDb;
use crate::envfile::Env;
use crate::errors::{RegularError, Result};
use crate::job::config::{CompletedJob, JobConfig};
use crate::notifier::{notify_if_needed, Notifier};
use crate::paths::{self, FILE_MODE, JOB_DIR_ENV_VAR, STDERR_FILE_NAME, STDOUT_FILE_NAME};
use crate::runner::queue::JobQueue;

/// How often the runner checks queue heads.
pub const RUN_INTERVAL: Duration = Duration::from_secs(1);

pub struct JobRunner {
    db: Arc<AppDb>,
    notifier: Arc<dyn Notifier>,
    queues: Mutex<HashMap<String, JobQueue>>,
    state_root: PathBuf,
}

impl JobRunner {
    pub fn new(db: Arc<AppDb>, notifier: Arc<dyn Notifier>, state_root: impl Into<PathBuf>) -> Self {
        Self {
            db,
            notifier,
            queues: Mutex::new(HashMap::new()),
            state_root: state_root.into(),
        }
    }

    /// Append a job to its queue. With `duplicate == false`, a waiting job
    /// with the same name makes this a silent no-op.
    pub fn enqueue(&self, job: JobConfig) {
        let mut queues = self.queues.lock().unwrap();

        let queue_name = job.queue_name().to_string();
        let queue = queues.entry(queue_name.clone()).or_insert_with(JobQueue::new);

        if !job.duplicate && queue.jobs.iter().any(|other| other.name == job.name) {
            return;
        }

        let job_name = job.name.clone();
        queue.jobs.push_back(job);
        let new_len = queue.jobs.len();

        if new_len == 1 {
            info!(job = %job_name, "put job in empty runner queue: {queue_name}");
        } else {
            info!(
                job = %job_name,
                "put job in runner queue {queue_name}, new length {new_len}"
            );
        }
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.lock().unwrap().keys().cloned().collect()
    }

    /// True while any queue has a running job.
    pub fn any_active(&self) -> bool {
        self.queues
            .lock()
            .unwrap()
            .values()
            .any(|queue| queue.active)
    }

    /// Number of waiting jobs, including a currently running head.
    pub fn queue_length(&self, queue_name: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(queue_name)
            .map_or(0, |queue| queue.jobs.len())
    }

    /// Mark the queue active and return a snapshot of its head job, or
    /// nothing if the queue is already active or empty. The head is not
    /// removed until the run completes.
    fn activate_queue_head(&self, queue_name: &str) -> Result<Option<JobConfig>> {
        let mut queues = self.queues.lock().unwrap();

        let queue = queues.get_mut(queue_name).ok_or_else(|| {
            RegularError::Other(anyhow!(
                "requested to run head of nonexistent queue: {queue_name}"
            ))
        })?;

        if queue.active || queue.jobs.is_empty() {
            return Ok(None);
        }

        queue.active = true;
        Ok(queue.jobs.front().cloned())
    }

    fn finish_queue_head(&self, queue_name: &str) {
        let mut queues = self.queues.lock().unwrap();

        if let Some(queue) = queues.get_mut(queue_name) {
            queue.active = false;
            queue.jobs.pop_front();
        }
    }

    /// Run the head job of a queue to completion: jitter, subprocess,
    /// completion record, notification. Returns whether a job was run.
    pub async fn run_queue_head(&self, queue_name: &str) -> Result<bool> {
        let Some(job) = self.activate_queue_head(queue_name)? else {
            return Ok(false);
        };

        let job_state_dir = self.state_root.join(&job.name);
        let outcome = self.execute(&job, &job_state_dir).await;

        self.finish_queue_head(queue_name);

        let completed = match outcome {
            Ok(completed) => completed,
            Err(err) => return Err(err),
        };

        let stdout_path = job_state_dir.join(STDOUT_FILE_NAME);
        let stderr_path = job_state_dir.join(STDERR_FILE_NAME);

        let save_result = self.db.save_completed_job(
            &job.name,
            &completed,
            &[("stdout", &stdout_path), ("stderr", &stderr_path)],
        );

        let notify_result =
            notify_if_needed(self.notifier.as_ref(), job.notify_mode, &job.name, &completed);

        if let Err(err) = &notify_result {
            error!(job = %job.name, "failed to notify about completed job: {err:#}");
        }
        if let Err(err) = &save_result {
            error!(job = %job.name, "failed to save completed job: {err}");
        }
        if !completed.is_success() {
            error!(job = %job.name, "command failed: {}", run_failure_message(&completed));
        }

        // The first error wins: notifier, then persistence, then the run.
        if let Err(err) = notify_result {
            return Err(RegularError::Subprocess {
                job: job.name.clone(),
                message: format!("failed to notify about completed job: {err:#}"),
            });
        }
        save_result?;
        if !completed.is_success() {
            return Err(RegularError::Subprocess {
                job: job.name.clone(),
                message: format!("command failed: {}", run_failure_message(&completed)),
            });
        }

        Ok(true)
    }

    /// Steps up to and including the subprocess wait. The queue lock is not
    /// held anywhere in here.
    async fn execute(&self, job: &JobConfig, job_state_dir: &Path) -> Result<CompletedJob> {
        paths::create_private_dir(job_state_dir).map_err(|err| RegularError::Subprocess {
            job: job.name.clone(),
            message: format!("failed to create job state directory: {err:#}"),
        })?;

        if !job.jitter.is_zero() {
            let sleep_ms = {
                let mut rng = rand::thread_rng();
                rng.gen_range(0..job.jitter.as_millis() as u64)
            };
            info!(job = %job.name, "waiting {:.1}s before start", sleep_ms as f64 / 1000.0);
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }

        let started = Local::now();
        info!(job = %job.name, "started");

        let (stdout, stderr) = if job.log {
            let stdout_file = open_log_file(&job_state_dir.join(STDOUT_FILE_NAME))
                .map_err(|err| log_file_error(&job.name, "stdout", err))?;
            let stderr_file = open_log_file(&job_state_dir.join(STDERR_FILE_NAME))
                .map_err(|err| log_file_error(&job.name, "stderr", err))?;
            (Stdio::from(stdout_file), Stdio::from(stderr_file))
        } else {
            (Stdio::null(), Stdio::null())
        };

        let job_dir = job.env.get(JOB_DIR_ENV_VAR);
        let (exit_status, error) =
            run_command(&job.command, &job.env, job_dir.map(String::as_str), stdout, stderr).await;

        info!(job = %job.name, "finished");
        let finished = Local::now();

        Ok(CompletedJob {
            error,
            exit_status,
            started,
            finished,
        })
    }

    /// Tick loop: once a second, dispatch every queue's head to a fresh
    /// task.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(RUN_INTERVAL);

        loop {
            ticker.tick().await;

            for queue_name in self.queue_names() {
                let runner = Arc::clone(&self);

                tokio::spawn(async move {
                    if let Err(err) = runner.run_queue_head(&queue_name).await {
                        error!("{err}");
                    }
                });
            }
        }
    }

    /// Drain every queue by running heads until nothing is left. Used by
    /// one-shot invocation; assumes no concurrent runner tick.
    pub async fn drain(&self) -> Result<()> {
        for queue_name in self.queue_names() {
            while self.queue_length(&queue_name) > 0 {
                if !self.run_queue_head(&queue_name).await? {
                    break;
                }
            }
        }

        Ok(())
    }
}

fn run_failure_message(completed: &CompletedJob) -> String {
    if completed.error.is_empty() {
        format!("exit status {}", completed.exit_status)
    } else {
        completed.error.clone()
    }
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_MODE)
        .open(path)
}

fn log_file_error(job: &str, stream: &str, err: std::io::Error) -> RegularError {
    RegularError::Subprocess {
        job: job.to_string(),
        message: format!("failed to create {stream} log file: {err}"),
    }
}

/// Spawn `command` with the given environment (fully replacing the inherited
/// one) and working directory, and wait for it. Returns the exit status and
/// an error description, empty on a clean exit.
///
/// A process killed by a signal records `128 + signal`; a process that could
/// not be started records `-1`.
pub(crate) async fn run_command(
    command: &[String],
    env: &Env,
    dir: Option<&str>,
    stdout: Stdio,
    stderr: Stdio,
) -> (i32, String) {
    if command.is_empty() {
        return (-1, "empty command".to_string());
    }

    let mut cmd = Command::new(&command[0]);
    cmd.args(&command[1..])
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);

    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => return (-1, format!("failed to start command: {err}")),
    };

    let status = match child.wait().await {
        Ok(status) => status,
        Err(err) => return (-1, format!("failed to wait for command: {err}")),
    };

    match status.code() {
        Some(code) => (code, String::new()),
        None => {
            let signal = status.signal().unwrap_or(0);
            (128 + signal, format!("terminated by signal {signal}"))
        }
    }
}
