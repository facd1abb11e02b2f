// src/job/store.rs

//! Concurrent map of job name to [`JobConfig`].
//!
//! Writers are the watcher and the loaders behind `update`; readers are the
//! scheduler and the status printer. The lock is never held across predicate
//! evaluation or subprocess launches: the scheduler works from `snapshot`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use tracing::warn;

use crate::errors::{RegularError, Result};
use crate::job::config::JobConfig;
use crate::job::loader;
use crate::paths::{self, JOB_CONFIG_FILE_NAME};

/// What `update` did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Added,
    Updated,
    /// The load failed before the store was touched.
    NoChange,
}

#[derive(Default)]
pub struct JobStore {
    by_name: RwLock<HashMap<String, JobConfig>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the job at `config_path` and replace any prior entry with the
    /// same name.
    pub fn update(
        &self,
        config_root: &Path,
        config_path: &Path,
    ) -> Result<(UpdateOutcome, JobConfig)> {
        let job_name = paths::job_name_from_path(config_path);

        let job = loader::load(config_root, config_path).map_err(|err| RegularError::Config {
            job: job_name.clone(),
            message: format!("failed to load job: {err:#}"),
        })?;

        let mut by_name = self.by_name.write().unwrap();
        let existed = by_name.insert(job_name, job.clone()).is_some();

        let outcome = if existed {
            UpdateOutcome::Updated
        } else {
            UpdateOutcome::Added
        };

        Ok((outcome, job))
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let mut by_name = self.by_name.write().unwrap();

        if by_name.remove(name).is_none() {
            return Err(RegularError::NotFound(name.to_string()));
        }

        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.by_name.read().unwrap().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<JobConfig> {
        self.by_name.read().unwrap().get(name).cloned()
    }

    /// Copy of the whole map, for iteration without holding the lock.
    pub fn snapshot(&self) -> Vec<(String, JobConfig)> {
        self.by_name
            .read()
            .unwrap()
            .iter()
            .map(|(name, job)| (name.clone(), job.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.by_name.write().unwrap().clear();
    }

    /// Walk `config_root` and load every job config found. Per-job load
    /// errors are logged and skipped; returns the names that loaded.
    pub fn load_all(&self, config_root: &Path) -> Result<Vec<String>> {
        let mut loaded = Vec::new();
        let mut config_files = Vec::new();
        collect_config_files(config_root, &mut config_files)?;

        for path in config_files {
            let job_name = paths::job_name_from_path(&path);

            match self.update(config_root, &path) {
                Ok(_) => loaded.push(job_name),
                Err(err) => warn!(job = %job_name, "error loading job: {err}"),
            }
        }

        loaded.sort();
        Ok(loaded)
    }
}

fn collect_config_files(dir: &Path, out: &mut Vec<std::path::PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if entry.file_type()?.is_dir() {
            collect_config_files(&path, out)?;
        } else if entry.file_name() == JOB_CONFIG_FILE_NAME {
            out.push(path);
        }
    }

    Ok(())
}
