// src/db.rs

//! SQLite-backed completion store.
//!
//! Two tables: `completed_jobs` holds one row per finished run, `job_logs`
//! holds captured log lines keyed by completion. Timestamps are stored as
//! RFC 3339 strings with the local offset.

use std::io::Read;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Local};
use rusqlite::{params, Connection, Transaction};

use crate::errors::{RegularError, Result};
use crate::job::config::CompletedJob;
use crate::paths::{self, APP_DB_FILE_NAME};

/// Cap on how much of a log file one `save` will capture, per stream.
const MAX_LOG_BUFFER_SIZE: u64 = 256 * 1024;

pub struct AppDb {
    conn: Mutex<Connection>,
}

impl AppDb {
    /// Open (creating if needed) the store under `state_root`.
    pub fn open(state_root: &Path) -> Result<Self> {
        paths::create_private_dir(state_root)?;

        let conn = Connection::open(state_root.join(APP_DB_FILE_NAME))?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

             CREATE TABLE IF NOT EXISTS completed_jobs (
                 id INTEGER PRIMARY KEY,
                 job_name TEXT NOT NULL,
                 error TEXT,
                 exit_status INTEGER NOT NULL,
                 started DATETIME NOT NULL,
                 finished DATETIME NOT NULL,
                 created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
             );

             CREATE INDEX IF NOT EXISTS idx_completed_jobs_job_name
                 ON completed_jobs(job_name);

             CREATE TABLE IF NOT EXISTS job_logs (
                 id INTEGER PRIMARY KEY,
                 completed_job_id INTEGER NOT NULL,
                 stream_name TEXT NOT NULL,
                 line_number INTEGER NOT NULL,
                 line TEXT NOT NULL,
                 FOREIGN KEY(completed_job_id) REFERENCES completed_jobs(id)
             );

             CREATE INDEX IF NOT EXISTS idx_job_logs_completed_job_id
                 ON job_logs(completed_job_id);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a completion record plus the captured lines of each log file
    /// that exists, in a single transaction.
    pub fn save_completed_job(
        &self,
        job_name: &str,
        completed: &CompletedJob,
        logs: &[(&str, &Path)],
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO completed_jobs (
                 job_name,
                 error,
                 exit_status,
                 started,
                 finished
             ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                job_name,
                completed.error,
                completed.exit_status,
                completed.started.to_rfc3339(),
                completed.finished.to_rfc3339(),
            ],
        )?;

        let completed_job_id = tx.last_insert_rowid();

        for (stream_name, path) in logs {
            save_log_file(&tx, completed_job_id, stream_name, path)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// The most recently inserted completion for `job_name`, if any.
    pub fn last_completed(&self, job_name: &str) -> Result<Option<CompletedJob>> {
        let conn = self.conn.lock().unwrap();

        let result = conn.query_row(
            "SELECT error, exit_status, started, finished
             FROM completed_jobs
             WHERE job_name = ?1
             ORDER BY id DESC LIMIT 1",
            params![job_name],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, i32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        );

        let (error, exit_status, started, finished) = match result {
            Ok(columns) => columns,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        Ok(Some(CompletedJob {
            error: error.unwrap_or_default(),
            exit_status,
            started: parse_timestamp(&started)?,
            finished: parse_timestamp(&finished)?,
        }))
    }

    /// The last `limit` lines of the named stream of the latest completion
    /// for `job_name`, in original order.
    pub fn job_logs(&self, job_name: &str, stream_name: &str, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT line
             FROM (
                 SELECT l.line, l.line_number
                 FROM job_logs l
                 JOIN completed_jobs j ON j.id = l.completed_job_id
                 WHERE l.stream_name = ?1
                 AND j.id = (
                     SELECT id
                     FROM completed_jobs
                     WHERE job_name = ?2
                     ORDER BY id DESC
                     LIMIT 1
                 )
                 ORDER BY l.line_number DESC
                 LIMIT ?3
             )
             ORDER BY line_number ASC",
        )?;

        let lines = stmt
            .query_map(params![stream_name, job_name, limit as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(lines)
    }
}

fn save_log_file(
    tx: &Transaction<'_>,
    completed_job_id: i64,
    stream_name: &str,
    path: &Path,
) -> Result<()> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(RegularError::Storage(err.to_string())),
    };

    let mut buf = Vec::new();
    file.take(MAX_LOG_BUFFER_SIZE)
        .read_to_end(&mut buf)
        .map_err(|err| RegularError::Storage(err.to_string()))?;

    let contents = String::from_utf8_lossy(&buf);

    for (index, line) in contents.lines().enumerate() {
        tx.execute(
            "INSERT INTO job_logs (
                 completed_job_id,
                 stream_name,
                 line_number,
                 line
             ) VALUES (?1, ?2, ?3, ?4)",
            params![completed_job_id, stream_name, (index + 1) as i64, line],
        )?;
    }

    Ok(())
}

fn parse_timestamp(s: &str) -> Result<DateTime<Local>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|err| RegularError::Storage(format!("bad timestamp {s:?}: {err}")))
}
