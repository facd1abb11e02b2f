// src/service.rs

//! The long-running service behind `regular start`.
//!
//! Owns the single-instance lock, primes the job store from the config
//! tree, and runs three long-lived tasks: the scheduler loop, the config
//! watcher, and the runner tick. A watcher failure is fatal; a scheduler
//! failure is logged and the loop restarted.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use fs2::FileExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::db::AppDb;
use crate::errors::{RegularError, Result};
use crate::job::store::JobStore;
use crate::notifier::{LogNotifier, Notifier};
use crate::paths::{self, APP_LOCK_FILE_NAME, FILE_MODE};
use crate::runner::JobRunner;
use crate::scheduler::Scheduler;
use crate::watch::spawn_watcher;

/// Take the exclusive service lock under `state_root`.
///
/// The returned file must be kept alive for as long as the service runs;
/// dropping it releases the lock.
pub fn acquire_lock(state_root: &Path) -> Result<std::fs::File> {
    let lock_path = state_root.join(APP_LOCK_FILE_NAME);

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .mode(FILE_MODE)
        .open(&lock_path)?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
            Err(RegularError::AlreadyRunning)
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn run_service(config_root: &Path, state_root: &Path) -> Result<()> {
    info!("starting");

    paths::create_private_dir(state_root)?;
    let _lock = acquire_lock(state_root)?;

    let db = Arc::new(AppDb::open(state_root)?);
    let store = Arc::new(JobStore::new());

    let loaded = store.load_all(config_root)?;
    info!("loaded jobs: {}", loaded.join(", "));

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new(Arc::clone(&db)));
    let runner = Arc::new(JobRunner::new(Arc::clone(&db), notifier, state_root));

    let (watcher_handle, mut watcher_task) = spawn_watcher(config_root, Arc::clone(&store))
        .map_err(|err| RegularError::Watcher(err.to_string()))?;

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&store),
        Arc::clone(&runner),
        Arc::clone(&db),
    ));
    let mut scheduler_task = spawn_scheduler(Arc::clone(&scheduler));

    let runner_task = tokio::spawn(Arc::clone(&runner).run());

    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping");
                break;
            }
            _ = sigterm.recv() => {
                info!("termination signal received, stopping");
                break;
            }
            res = &mut watcher_task => {
                drop(watcher_handle);
                return match res {
                    Ok(Err(err)) => Err(err),
                    Ok(Ok(())) => Err(RegularError::Watcher("watcher loop exited".to_string())),
                    Err(join_err) => {
                        Err(RegularError::Other(anyhow!("watcher task failed: {join_err}")))
                    }
                };
            }
            res = &mut scheduler_task => {
                match res {
                    Ok(Err(err)) => error!("scheduler loop failed, restarting: {err}"),
                    Ok(Ok(())) => {}
                    Err(join_err) => error!("scheduler task failed, restarting: {join_err}"),
                }
                scheduler_task = spawn_scheduler(Arc::clone(&scheduler));
            }
        }
    }

    // Stop dispatching new work, but let in-flight jobs finish and persist
    // their completion records.
    scheduler_task.abort();
    runner_task.abort();
    drop(watcher_handle);

    while runner.any_active() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    info!("stopped");
    Ok(())
}

fn spawn_scheduler(scheduler: Arc<Scheduler>) -> JoinHandle<Result<()>> {
    tokio::spawn(async move { scheduler.run().await })
}
