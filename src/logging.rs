// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Log lines go to stdout and are mirrored to `app.log` under the state
//! root, so `regular log` can replay what the service reported. The level
//! comes from the `REGULAR_LOG` environment variable, defaulting to `info`.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tracing_subscriber::fmt::{self, MakeWriter};

use crate::paths::{APP_LOG_FILE_NAME, FILE_MODE};

/// Initialise the global logging subscriber.
///
/// Safe to call once at startup. If the app log file can't be opened, log
/// output still goes to stdout.
pub fn init_logging(state_root: &Path) -> Result<()> {
    let level = std::env::var("REGULAR_LOG")
        .ok()
        .and_then(|s| parse_level_str(&s))
        .unwrap_or(tracing::Level::INFO);

    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .mode(FILE_MODE)
        .open(state_root.join(APP_LOG_FILE_NAME))
        .ok()
        .map(|file| Arc::new(Mutex::new(file)));

    fmt::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(false)
        .with_writer(TeeMakeWriter { file })
        .init();

    Ok(())
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}

/// Writer factory that duplicates log output into the app log file.
#[derive(Clone)]
struct TeeMakeWriter {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl<'a> MakeWriter<'a> for TeeMakeWriter {
    type Writer = TeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        TeeWriter {
            file: self.file.clone(),
        }
    }
}

struct TeeWriter {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(file) = &self.file {
            let _ = file.lock().unwrap().write_all(buf);
        }

        io::stdout().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = &self.file {
            let _ = file.lock().unwrap().flush();
        }

        io::stdout().flush()
    }
}
