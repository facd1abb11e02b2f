// src/watch/watcher.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::RegularError;
use crate::job::store::{JobStore, UpdateOutcome};
use crate::paths::{self, GLOBAL_ENV_FILE_NAME, JOB_CONFIG_FILE_NAME, JOB_ENV_FILE_NAME};
use crate::watch::debounce::Debouncer;

/// Quiet period before a burst of filesystem events is acted on.
pub const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(100);

/// Handle for the filesystem watcher.
///
/// Keeps the underlying `RecommendedWatcher` alive; dropping this handle
/// stops file watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// Watch the configuration tree recursively and mutate the job store as
/// config files change.
///
/// Returns the watcher handle and the event-loop task. The task finishes
/// with an error when the event channel closes; the supervisor treats that
/// as fatal.
pub fn spawn_watcher(
    config_root: impl Into<PathBuf>,
    store: Arc<JobStore>,
) -> Result<(WatcherHandle, JoinHandle<crate::errors::Result<()>>)> {
    let config_root = config_root.into();

    // Channel from the blocking notify callback into the async world.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(err) = event_tx.send(event) {
                    // We can't log via tracing here easily, so fall back to stderr.
                    eprintln!("regular: failed to forward notify event: {err}");
                }
            }
            Err(err) => {
                eprintln!("regular: file watch error: {err}");
            }
        },
        Config::default(),
    )?;

    watcher.watch(&config_root, RecursiveMode::Recursive)?;
    info!("config watcher started on {:?}", config_root);

    let task = tokio::spawn(watch_changes(config_root, store, event_rx));

    Ok((WatcherHandle { _inner: watcher }, task))
}

/// Consume filesystem events and apply the per-file reactions:
///
/// - `config.star` written: debounced reload of that job; removal on error.
/// - `config.star` gone: immediate removal.
/// - `job.env` written for a known job: debounced reload.
/// - `global.env` written: debounced full store reload.
/// - new directory: debounced load if it contains a `config.star`.
async fn watch_changes(
    config_root: PathBuf,
    store: Arc<JobStore>,
    mut event_rx: mpsc::UnboundedReceiver<Event>,
) -> crate::errors::Result<()> {
    let debouncer = Debouncer::new(DEBOUNCE_INTERVAL);

    while let Some(event) = event_rx.recv().await {
        debug!("received notify event: {:?}", event);

        for event_path in &event.paths {
            let basename = event_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            if basename == GLOBAL_ENV_FILE_NAME {
                let store = Arc::clone(&store);
                let config_root = config_root.clone();

                debouncer.call(move || {
                    store.clear();
                    match store.load_all(&config_root) {
                        Ok(loaded) => info!(
                            "reloaded jobs because global env file changed: {}",
                            loaded.join(", ")
                        ),
                        Err(err) => warn!(
                            "failed to reload jobs because global env file changed: {err}"
                        ),
                    }
                });
            } else if basename == JOB_CONFIG_FILE_NAME {
                let job_name = paths::job_name_from_path(event_path);

                match std::fs::metadata(event_path) {
                    Ok(_) => {
                        // Debounce updates to handle rapid saves.
                        debouncer.call(update_action(
                            &store,
                            &config_root,
                            &job_name,
                            event_path.clone(),
                        ));
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                        match store.remove(&job_name) {
                            Ok(()) => {
                                info!(job = %job_name, "removed job because config file is gone")
                            }
                            Err(err) => {
                                warn!(job = %job_name, "failed to remove job with config file gone: {err}")
                            }
                        }
                    }
                    Err(err) => {
                        warn!(job = %job_name, "error checking file {:?} before update: {err}", event_path)
                    }
                }
            } else if basename == JOB_ENV_FILE_NAME {
                let job_name = paths::job_name_from_path(event_path);

                if store.exists(&job_name) {
                    let config_path =
                        config_root.join(&job_name).join(JOB_CONFIG_FILE_NAME);
                    debouncer.call(update_action(&store, &config_root, &job_name, config_path));
                }
            } else if event.kind.is_create() {
                // A new directory may bring a job config with it.
                let config_path = event_path.join(JOB_CONFIG_FILE_NAME);

                let is_dir = std::fs::metadata(event_path)
                    .map(|meta| meta.is_dir())
                    .unwrap_or(false);

                if is_dir && config_path.exists() {
                    let job_name = paths::job_name_from_path(&config_path);
                    debouncer.call(update_action(&store, &config_root, &job_name, config_path));
                }
            }
        }
    }

    Err(RegularError::Watcher(
        "filesystem event channel closed".to_string(),
    ))
}

/// Debounced reaction to a changed job: reload it, and on a failed load fall
/// back to removing it from the store, logging both outcomes.
fn update_action(
    store: &Arc<JobStore>,
    config_root: &Path,
    job_name: &str,
    config_path: PathBuf,
) -> impl FnOnce() + Send + 'static {
    let store = Arc::clone(store);
    let config_root = config_root.to_path_buf();
    let job_name = job_name.to_string();

    move || match store.update(&config_root, &config_path) {
        Ok((UpdateOutcome::Added, _)) => info!(job = %job_name, "added job"),
        Ok((UpdateOutcome::Updated, _)) => info!(job = %job_name, "updated job"),
        Ok((UpdateOutcome::NoChange, _)) => {
            info!(job = %job_name, "job checked; no effective changes detected")
        }
        Err(err) => match store.remove(&job_name) {
            Ok(()) => info!(job = %job_name, "removed job after update error: {err}"),
            Err(remove_err) => {
                warn!(job = %job_name, "failed to remove job: {remove_err} (original error: {err})")
            }
        },
    }
}
