// src/commands/status.rs

//! The `status` pretty-printer.
//!
//! Shows each job's effective configuration, its last completion, and
//! recent log tails. Env entries inherited unchanged from the process
//! environment are hidden, and values of secret-looking keys are redacted.

use std::collections::HashSet;
use std::path::Path;

use crate::db::AppDb;
use crate::envfile;
use crate::errors::Result;
use crate::job::store::JobStore;

const SEPARATOR_WIDTH: usize = 80;
const REDACTED_VALUE: &str = "<redacted>";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn status(
    config_root: &Path,
    state_root: &Path,
    log_lines: usize,
    job_names: &[String],
) -> Result<()> {
    let separator = "-".repeat(SEPARATOR_WIDTH);

    let store = JobStore::new();
    store.load_all(config_root)?;

    let db = AppDb::open(state_root)?;
    let os_env = envfile::os_env();

    // Iterate over the requested names rather than the store to preserve
    // the order given on the command line.
    let mut selected = job_names.to_vec();
    if selected.is_empty() {
        selected = store
            .snapshot()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        selected.sort();
    }

    let mut seen = HashSet::new();
    let count = selected.len();

    for (i, name) in selected.iter().enumerate() {
        let Some(job) = store.get(name) else {
            continue;
        };

        if !seen.insert(name.clone()) {
            continue;
        }

        let mut env = job.env.clone();
        env.retain(|key, value| os_env.get(key) != Some(value));
        for (key, value) in env.iter_mut() {
            if is_secret_key(key) {
                *value = REDACTED_VALUE.to_string();
            }
        }

        println!("{name}");
        println!("    duplicate: {}", yes_no(job.duplicate));

        if env.is_empty() {
            println!("    env: none");
        } else {
            println!("    env:");
            for (key, value) in &env {
                println!("        {key}: {value}");
            }
        }

        println!("    enabled: {}", yes_no(job.enabled));
        println!("    jitter: {}s", job.jitter.as_secs());
        println!("    queue: {}", job.queue_name());

        match db.last_completed(&job.name)? {
            Some(completed) => {
                println!(
                    "    last started:  {}",
                    completed.started.format(TIMESTAMP_FORMAT)
                );
                println!(
                    "    last finished: {}",
                    completed.finished.format(TIMESTAMP_FORMAT)
                );
                println!("    exit status: {}", completed.exit_status);
            }
            None => {
                println!("    last started:  unknown");
                println!("    last finished: unknown");
                println!("    exit status: unknown");
            }
        }

        println!("    logs:");
        for stream_name in ["stdout", "stderr"] {
            let lines = db.job_logs(name, stream_name, log_lines)?;

            if lines.is_empty() {
                println!("        {stream_name}: empty");
                continue;
            }

            println!("        {stream_name}:");
            println!("{separator}");
            for line in lines {
                println!("{line}");
            }
            println!("{separator}");
        }

        if i != count - 1 {
            println!();
        }
    }

    Ok(())
}

/// Matches the redaction policy `(?i)(key|password|secret|token)`.
fn is_secret_key(key: &str) -> bool {
    let key = key.to_lowercase();

    ["key", "password", "secret", "token"]
        .iter()
        .any(|marker| key.contains(marker))
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
