use std::error::Error;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use regular::db::AppDb;
use regular::errors::RegularError;
use regular::job::{CompletedJob, JobConfig};
use regular::notifier::Notifier;
use regular::runner::JobRunner;

type TestResult = Result<(), Box<dyn Error>>;

/// Notifier test double that records every invocation.
#[derive(Default)]
struct CapturingNotifier {
    calls: Mutex<Vec<(String, CompletedJob)>>,
}

impl CapturingNotifier {
    fn calls(&self) -> Vec<(String, CompletedJob)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Notifier for CapturingNotifier {
    fn notify(&self, job_name: &str, completed: &CompletedJob) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((job_name.to_string(), completed.clone()));
        Ok(())
    }
}

fn shell_job(name: &str, script: &str) -> JobConfig {
    let mut job = JobConfig::new(name);
    job.command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
    job
}

fn runner_fixture(dir: &TempDir) -> (Arc<JobRunner>, Arc<AppDb>, Arc<CapturingNotifier>) {
    let db = Arc::new(AppDb::open(dir.path()).unwrap());
    let notifier = Arc::new(CapturingNotifier::default());
    let runner = Arc::new(JobRunner::new(
        Arc::clone(&db),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        dir.path(),
    ));
    (runner, db, notifier)
}

#[tokio::test]
async fn successful_run_records_completion_and_stdout() -> TestResult {
    let dir = TempDir::new()?;
    let (runner, db, notifier) = runner_fixture(&dir);

    runner.enqueue(shell_job("echo", "echo hi"));
    assert!(runner.run_queue_head("echo").await?);

    let completed = db.last_completed("echo")?.ok_or("expected a record")?;
    assert_eq!(completed.exit_status, 0);
    assert!(completed.error.is_empty());
    assert!(completed.started <= completed.finished);

    assert_eq!(db.job_logs("echo", "stdout", 10)?, vec!["hi"]);
    assert!(db.job_logs("echo", "stderr", 10)?.is_empty());

    // The default notify mode is on-failure; a clean run stays quiet.
    assert!(notifier.calls().is_empty());

    // The queue is empty again.
    assert_eq!(runner.queue_length("echo"), 0);

    Ok(())
}

#[tokio::test]
async fn failed_run_notifies_with_the_same_record() -> TestResult {
    let dir = TempDir::new()?;
    let (runner, db, notifier) = runner_fixture(&dir);

    runner.enqueue(shell_job("fail", "exit 7"));

    let err = runner
        .run_queue_head("fail")
        .await
        .expect_err("expected a run error");
    assert!(matches!(err, RegularError::Subprocess { .. }));

    let completed = db.last_completed("fail")?.ok_or("expected a record")?;
    assert_eq!(completed.exit_status, 7);

    let calls = notifier.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "fail");
    assert_eq!(calls[0].1.exit_status, completed.exit_status);
    assert_eq!(
        calls[0].1.started.timestamp(),
        completed.started.timestamp()
    );

    Ok(())
}

#[tokio::test]
async fn log_capture_can_be_disabled() -> TestResult {
    let dir = TempDir::new()?;
    let (runner, db, _notifier) = runner_fixture(&dir);

    let mut job = shell_job("quiet", "echo hi");
    job.log = false;
    runner.enqueue(job);

    runner.run_queue_head("quiet").await?;

    assert!(db.last_completed("quiet")?.is_some());
    assert!(db.job_logs("quiet", "stdout", 10)?.is_empty());
    assert!(!dir.path().join("quiet").join("stdout.log").exists());

    Ok(())
}

#[tokio::test]
async fn spawn_failure_records_error_message() -> TestResult {
    let dir = TempDir::new()?;
    let (runner, db, notifier) = runner_fixture(&dir);

    let mut job = JobConfig::new("nocmd");
    job.command = vec!["this-is-a-nonexistent-command".to_string()];
    runner.enqueue(job);

    let err = runner
        .run_queue_head("nocmd")
        .await
        .expect_err("expected a spawn error");
    assert!(matches!(err, RegularError::Subprocess { .. }));

    let completed = db.last_completed("nocmd")?.ok_or("expected a record")?;
    assert_eq!(completed.exit_status, -1);
    assert!(completed.error.contains("failed to start command"));

    // on-failure mode fires for spawn failures too.
    assert!(notifier.calls().iter().any(|(name, _)| name == "nocmd"));

    Ok(())
}

#[tokio::test]
async fn duplicate_suppression_keeps_queue_length_at_one() -> TestResult {
    let dir = TempDir::new()?;
    let (runner, _db, _notifier) = runner_fixture(&dir);

    let job = shell_job("dup", "true");
    assert!(!job.duplicate);

    runner.enqueue(job.clone());
    runner.enqueue(job.clone());
    runner.enqueue(job);

    assert_eq!(runner.queue_length("dup"), 1);

    Ok(())
}

#[tokio::test]
async fn duplicates_allowed_when_enabled() -> TestResult {
    let dir = TempDir::new()?;
    let (runner, _db, _notifier) = runner_fixture(&dir);

    let mut job = shell_job("dup", "true");
    job.duplicate = true;

    runner.enqueue(job.clone());
    runner.enqueue(job);

    assert_eq!(runner.queue_length("dup"), 2);

    Ok(())
}

#[tokio::test]
async fn shared_queue_serializes_in_fifo_order() -> TestResult {
    let dir = TempDir::new()?;
    let (runner, db, _notifier) = runner_fixture(&dir);

    let mut a = shell_job("a", "sleep 0.3");
    a.queue = "shared".to_string();
    let mut b = shell_job("b", "true");
    b.queue = "shared".to_string();

    runner.enqueue(a);
    runner.enqueue(b);
    assert_eq!(runner.queue_length("shared"), 2);

    // A concurrent attempt on the same queue is a no-op while the head runs.
    let first = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.run_queue_head("shared").await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!runner.run_queue_head("shared").await?);

    assert!(first.await??);

    // Now the second job can run.
    assert!(runner.run_queue_head("shared").await?);

    let a_record = db.last_completed("a")?.ok_or("expected a record for a")?;
    let b_record = db.last_completed("b")?.ok_or("expected a record for b")?;
    assert!(a_record.finished <= b_record.started);

    Ok(())
}

#[tokio::test]
async fn running_job_stays_visible_at_queue_head() -> TestResult {
    let dir = TempDir::new()?;
    let (runner, _db, _notifier) = runner_fixture(&dir);

    runner.enqueue(shell_job("visible", "sleep 0.3"));

    let handle = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.run_queue_head("visible").await })
    };

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(runner.any_active());
    assert_eq!(runner.queue_length("visible"), 1);

    handle.await??;
    assert!(!runner.any_active());
    assert_eq!(runner.queue_length("visible"), 0);

    Ok(())
}

#[tokio::test]
async fn empty_queue_head_is_a_no_op() -> TestResult {
    let dir = TempDir::new()?;
    let (runner, _db, _notifier) = runner_fixture(&dir);

    runner.enqueue(shell_job("once", "true"));
    assert!(runner.run_queue_head("once").await?);
    assert!(!runner.run_queue_head("once").await?);

    Ok(())
}

#[tokio::test]
async fn nonexistent_queue_is_an_error() -> TestResult {
    let dir = TempDir::new()?;
    let (runner, _db, _notifier) = runner_fixture(&dir);

    assert!(runner.run_queue_head("no-such-queue").await.is_err());

    Ok(())
}

#[tokio::test]
async fn notify_always_fires_on_success() -> TestResult {
    let dir = TempDir::new()?;
    let (runner, _db, notifier) = runner_fixture(&dir);

    let mut job = shell_job("loud", "true");
    job.notify_mode = regular::job::NotifyMode::Always;
    runner.enqueue(job);

    runner.run_queue_head("loud").await?;

    let calls = notifier.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.exit_status, 0);

    Ok(())
}

#[tokio::test]
async fn notify_never_stays_silent_on_failure() -> TestResult {
    let dir = TempDir::new()?;
    let (runner, _db, notifier) = runner_fixture(&dir);

    let mut job = shell_job("silent", "exit 1");
    job.notify_mode = regular::job::NotifyMode::Never;
    runner.enqueue(job);

    runner.run_queue_head("silent").await.ok();

    assert!(notifier.calls().is_empty());

    Ok(())
}

#[tokio::test]
async fn jitter_delays_but_does_not_block_the_run() -> TestResult {
    let dir = TempDir::new()?;
    let (runner, db, _notifier) = runner_fixture(&dir);

    let mut job = shell_job("jittery", "true");
    job.jitter = std::time::Duration::from_secs(1);
    runner.enqueue(job);

    let begun = std::time::Instant::now();
    assert!(runner.run_queue_head("jittery").await?);

    // The pre-start sleep is uniform on [0, 1s).
    assert!(begun.elapsed() < std::time::Duration::from_secs(2));
    assert!(db.last_completed("jittery")?.is_some());

    Ok(())
}

#[tokio::test]
async fn subprocess_env_replaces_inherited_environment() -> TestResult {
    let dir = TempDir::new()?;
    let (runner, db, _notifier) = runner_fixture(&dir);

    let mut job = shell_job("enved", "echo \"${ONLY_VAR:-unset}\"; env | wc -l >&2");
    job.env
        .insert("ONLY_VAR".to_string(), "present".to_string());
    job.env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
    runner.enqueue(job);

    runner.run_queue_head("enved").await?;

    assert_eq!(db.job_logs("enved", "stdout", 10)?, vec!["present"]);

    Ok(())
}
