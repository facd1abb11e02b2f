// src/scheduler.rs

//! The scheduler loop: every minute, evaluate each job's `should_run`
//! against the calendar and its last completion, and enqueue the jobs whose
//! predicate returned true.
//!
//! On an overloaded system the ticker can miss a minute, so each tick
//! re-evaluates every whole minute elapsed since the previous tick. The
//! catch-up is clamped: after more than [`MAX_MISSED_TIME`] without a tick
//! (hibernation, suspend), the missed interval is skipped entirely rather
//! than replayed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::db::AppDb;
use crate::errors::{RegularError, Result};
use crate::job::config::JobConfig;
use crate::job::predicate::PredicateArgs;
use crate::job::store::JobStore;
use crate::runner::JobRunner;

pub const SCHEDULE_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound on the interval the scheduler will catch up on.
pub const MAX_MISSED_TIME: Duration = Duration::from_secs(60 * 60);

pub struct Scheduler {
    store: Arc<JobStore>,
    runner: Arc<JobRunner>,
    db: Arc<AppDb>,
}

impl Scheduler {
    pub fn new(store: Arc<JobStore>, runner: Arc<JobRunner>, db: Arc<AppDb>) -> Self {
        Self { store, runner, db }
    }

    /// Evaluate one job's predicate at time `t` and enqueue it when due.
    ///
    /// Predicate failures surface as errors for the caller to log under the
    /// job's name; a store lookup failure also propagates.
    pub fn schedule_job(&self, job: &JobConfig, t: DateTime<Local>) -> Result<()> {
        if !job.enabled {
            return Ok(());
        }

        let Some(should_run) = &job.should_run else {
            debug!(job = %job.name, "job has no \"should_run\"; skipping");
            return Ok(());
        };

        let last = self.db.last_completed(&job.name)?;
        let args = PredicateArgs::at(t, last.as_ref());

        if should_run
            .call(&args)
            .map_err(|err| RegularError::Predicate {
                job: job.name.clone(),
                message: format!("{err:#}"),
            })?
        {
            self.runner.enqueue(job.clone());
        }

        Ok(())
    }

    /// One pass over a snapshot of the store at time `t`.
    ///
    /// Per-job predicate errors are logged and do not stop the pass;
    /// store-level errors abort it.
    pub fn schedule_once(&self, t: DateTime<Local>) -> Result<()> {
        for (name, job) in self.store.snapshot() {
            match self.schedule_job(&job, t) {
                Ok(()) => {}
                Err(err @ RegularError::Predicate { .. }) => {
                    warn!(job = %name, "scheduling error: {err}");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    /// Tick forever. Returns only on a store-level error; the supervisor
    /// restarts the loop.
    pub async fn run(&self) -> Result<()> {
        let mut current = Local::now();
        self.schedule_once(current)?;

        let mut ticker = tokio::time::interval(SCHEDULE_INTERVAL);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let last = current;
            current = Local::now();

            for t in missed_minutes(last, current, MAX_MISSED_TIME) {
                self.schedule_once(t)?;
            }
        }
    }
}

/// The whole minutes in `[last, current)` to evaluate on this tick.
///
/// Empty when more than `max_missed` has elapsed: days' worth of jobs should
/// not fire at once after the machine wakes from hibernation.
pub fn missed_minutes(
    last: DateTime<Local>,
    current: DateTime<Local>,
    max_missed: Duration,
) -> Vec<DateTime<Local>> {
    if current - last > chrono::Duration::seconds(max_missed.as_secs() as i64) {
        return Vec::new();
    }

    let mut minutes = Vec::new();
    let mut t = last;

    while t < current {
        minutes.push(t);
        t += chrono::Duration::minutes(1);
    }

    minutes
}
