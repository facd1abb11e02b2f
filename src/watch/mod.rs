// src/watch/mod.rs

//! Hot-reload of the configuration tree.
//!
//! Turns filesystem events under the config root into job-store mutations:
//! job config writes become reloads, deletions become removals, and a
//! `global.env` change reloads everything. Bursts of events are debounced.

pub mod debounce;
pub mod watcher;

pub use debounce::Debouncer;
pub use watcher::{spawn_watcher, WatcherHandle, DEBOUNCE_INTERVAL};
