// src/runner/mod.rs

//! Queue-based job execution.
//!
//! Jobs enqueue into named queues; each queue runs at most one job at a
//! time, in FIFO order. The runner tick dispatches queue heads to their own
//! tasks, so separate queues run in parallel.

pub mod exec;
pub mod queue;

pub use exec::{JobRunner, RUN_INTERVAL};
pub use queue::JobQueue;
