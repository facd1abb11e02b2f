use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Local, TimeZone};
use tempfile::TempDir;

use regular::db::AppDb;
use regular::job::predicate::{Predicate, PredicateArgs};
use regular::job::{CompletedJob, JobConfig, JobStore};
use regular::notifier::Notifier;
use regular::runner::JobRunner;
use regular::scheduler::{missed_minutes, Scheduler, MAX_MISSED_TIME};

type TestResult = Result<(), Box<dyn Error>>;

struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _job_name: &str, _completed: &CompletedJob) -> anyhow::Result<()> {
        Ok(())
    }
}

fn fixture(dir: &TempDir) -> (Scheduler, Arc<JobRunner>, Arc<AppDb>) {
    let db = Arc::new(AppDb::open(dir.path()).unwrap());
    let runner = Arc::new(JobRunner::new(
        Arc::clone(&db),
        Arc::new(NullNotifier),
        dir.path(),
    ));
    let scheduler = Scheduler::new(
        Arc::new(JobStore::new()),
        Arc::clone(&runner),
        Arc::clone(&db),
    );
    (scheduler, runner, db)
}

fn job_with_predicate(name: &str, predicate: Arc<dyn Predicate>) -> JobConfig {
    let mut job = JobConfig::new(name);
    job.command = vec!["true".to_string()];
    job.should_run = Some(predicate);
    job
}

#[test]
fn catch_up_covers_every_missed_minute() {
    let start = Local.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
    let end = start + chrono::Duration::minutes(30);

    let minutes = missed_minutes(start, end, MAX_MISSED_TIME);

    assert_eq!(minutes.len(), 30);
    assert_eq!(minutes[0], start);
    assert_eq!(minutes[29], start + chrono::Duration::minutes(29));
    // The minute-15 slot is evaluated exactly once.
    assert_eq!(
        minutes
            .iter()
            .filter(|t| *t == &(start + chrono::Duration::minutes(15)))
            .count(),
        1
    );
}

#[test]
fn catch_up_is_clamped_after_long_pauses() {
    let start = Local.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
    let end = start + chrono::Duration::minutes(90);

    let minutes = missed_minutes(start, end, MAX_MISSED_TIME);

    assert!(minutes.is_empty());
}

#[test]
fn catch_up_at_exactly_the_bound_still_runs() {
    let start = Local.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
    let end = start + chrono::Duration::minutes(60);

    let minutes = missed_minutes(start, end, MAX_MISSED_TIME);

    assert_eq!(minutes.len(), 60);
}

#[test]
fn due_job_is_enqueued() -> TestResult {
    let dir = TempDir::new()?;
    let (scheduler, runner, _db) = fixture(&dir);

    let predicate: Arc<dyn Predicate> =
        Arc::new(|args: &PredicateArgs| -> anyhow::Result<bool> { Ok(args.minute == 15) });
    let job = job_with_predicate("quarterly", predicate);

    let t = Local.with_ymd_and_hms(2024, 6, 1, 10, 15, 0).unwrap();
    scheduler.schedule_job(&job, t)?;
    assert_eq!(runner.queue_length("quarterly"), 1);

    let t = Local.with_ymd_and_hms(2024, 6, 1, 10, 16, 0).unwrap();
    scheduler.schedule_job(&job, t)?;
    assert_eq!(runner.queue_length("quarterly"), 1);

    Ok(())
}

#[test]
fn disabled_job_is_never_evaluated() -> TestResult {
    let dir = TempDir::new()?;
    let (scheduler, runner, _db) = fixture(&dir);

    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invocations);
    let predicate: Arc<dyn Predicate> =
        Arc::new(move |_args: &PredicateArgs| -> anyhow::Result<bool> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        });

    let mut job = job_with_predicate("disabled", predicate);
    job.enabled = false;

    scheduler.schedule_job(&job, Local::now())?;

    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert_eq!(runner.queue_length("disabled"), 0);

    Ok(())
}

#[test]
fn job_without_predicate_is_skipped() -> TestResult {
    let dir = TempDir::new()?;
    let (scheduler, runner, _db) = fixture(&dir);

    let mut job = JobConfig::new("manual-only");
    job.command = vec!["true".to_string()];

    scheduler.schedule_job(&job, Local::now())?;
    assert_eq!(runner.queue_length("manual-only"), 0);

    Ok(())
}

#[test]
fn predicate_failure_is_a_predicate_error() -> TestResult {
    let dir = TempDir::new()?;
    let (scheduler, runner, _db) = fixture(&dir);

    let predicate: Arc<dyn Predicate> =
        Arc::new(|_args: &PredicateArgs| -> anyhow::Result<bool> { anyhow::bail!("boom") });
    let job = job_with_predicate("throwing", predicate);

    let err = scheduler
        .schedule_job(&job, Local::now())
        .expect_err("expected a predicate error");

    assert!(matches!(
        err,
        regular::errors::RegularError::Predicate { .. }
    ));
    assert_eq!(runner.queue_length("throwing"), 0);

    Ok(())
}

#[test]
fn predicate_sees_never_ran_sentinels() -> TestResult {
    let dir = TempDir::new()?;
    let (scheduler, _runner, _db) = fixture(&dir);

    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let predicate: Arc<dyn Predicate> =
        Arc::new(move |args: &PredicateArgs| -> anyhow::Result<bool> {
            *sink.lock().unwrap() = Some(*args);
            Ok(false)
        });

    let job = job_with_predicate("fresh", predicate);
    scheduler.schedule_job(&job, Local::now())?;

    let args = seen.lock().unwrap().ok_or("predicate was not called")?;
    assert_eq!(args.exit_status, -1);
    assert_eq!(args.started, -1);
    assert_eq!(args.finished, -1);

    Ok(())
}

#[test]
fn predicate_sees_the_last_completion() -> TestResult {
    let dir = TempDir::new()?;
    let (scheduler, _runner, db) = fixture(&dir);

    let started = Local.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
    let finished = Local.with_ymd_and_hms(2024, 6, 1, 9, 0, 30).unwrap();
    db.save_completed_job(
        "tracked",
        &CompletedJob {
            error: String::new(),
            exit_status: 4,
            started,
            finished,
        },
        &[],
    )?;

    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let predicate: Arc<dyn Predicate> =
        Arc::new(move |args: &PredicateArgs| -> anyhow::Result<bool> {
            *sink.lock().unwrap() = Some(*args);
            Ok(false)
        });

    let job = job_with_predicate("tracked", predicate);
    scheduler.schedule_job(&job, Local::now())?;

    let args = seen.lock().unwrap().ok_or("predicate was not called")?;
    assert_eq!(args.exit_status, 4);
    assert_eq!(args.started, started.timestamp());
    assert_eq!(args.finished, finished.timestamp());

    Ok(())
}

#[test]
fn calendar_fields_match_the_tick_time() -> TestResult {
    let dir = TempDir::new()?;
    let (scheduler, _runner, _db) = fixture(&dir);

    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let predicate: Arc<dyn Predicate> =
        Arc::new(move |args: &PredicateArgs| -> anyhow::Result<bool> {
            *sink.lock().unwrap() = Some(*args);
            Ok(false)
        });

    let job = job_with_predicate("calendar", predicate);

    // 2024-06-02 was a Sunday.
    let t = Local.with_ymd_and_hms(2024, 6, 2, 23, 45, 0).unwrap();
    scheduler.schedule_job(&job, t)?;

    let args = seen.lock().unwrap().ok_or("predicate was not called")?;
    assert_eq!(args.minute, 45);
    assert_eq!(args.hour, 23);
    assert_eq!(args.day, 2);
    assert_eq!(args.month, 6);
    assert_eq!(args.dow, 0);
    assert_eq!(args.timestamp, t.timestamp());

    Ok(())
}
