// src/job/predicate.rs

//! The `should_run` predicate: a callable evaluated once per scheduler tick.
//!
//! The core treats the callable as opaque. The production implementation
//! wraps a frozen Starlark function; tests substitute plain closures.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, Local, Timelike};
use starlark::environment::{Globals, GlobalsBuilder, Module};
use starlark::eval::Evaluator;
use starlark::starlark_module;
use starlark::values::{OwnedFrozenValue, Value};

use crate::job::config::CompletedJob;

/// Named arguments passed to `should_run`. All of them are always passed;
/// modules accept the subset they care about via `**_`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredicateArgs {
    pub minute: u32,
    pub hour: u32,
    pub day: u32,
    pub month: u32,
    /// Day of week, Sunday = 0.
    pub dow: u32,
    pub timestamp: i64,
    /// Exit status of the last completed run, -1 if the job never ran.
    pub exit_status: i32,
    /// Epoch seconds of the last start, -1 if the job never ran.
    pub started: i64,
    /// Epoch seconds of the last finish, -1 if the job never ran.
    pub finished: i64,
}

impl PredicateArgs {
    /// Calendar fields from `t` plus the last-completion fields, or their
    /// never-ran sentinels.
    pub fn at(t: DateTime<Local>, last: Option<&CompletedJob>) -> Self {
        Self {
            minute: t.minute(),
            hour: t.hour(),
            day: t.day(),
            month: t.month(),
            dow: t.weekday().num_days_from_sunday(),
            timestamp: t.timestamp(),
            exit_status: last.map_or(-1, |cj| cj.exit_status),
            started: last.map_or(-1, |cj| cj.started.timestamp()),
            finished: last.map_or(-1, |cj| cj.finished.timestamp()),
        }
    }
}

/// A `should_run` callable. Must return exactly `true` or `false`; anything
/// else is a predicate error and the job is skipped for that tick.
pub trait Predicate: Send + Sync {
    fn call(&self, args: &PredicateArgs) -> Result<bool>;
}

impl<F> Predicate for F
where
    F: Fn(&PredicateArgs) -> Result<bool> + Send + Sync,
{
    fn call(&self, args: &PredicateArgs) -> Result<bool> {
        self(args)
    }
}

#[starlark_module]
fn job_builtins(builder: &mut GlobalsBuilder) {
    /// Shell-safe quoting, for modules that build command lines.
    fn quote(s: &str, shell: Option<&str>) -> anyhow::Result<String> {
        crate::shellquote::quote(s, shell.unwrap_or("posix"))
    }
}

/// Predeclared bindings available to every job module: the standard Starlark
/// library, `quote`, and the duration constants.
pub(crate) fn job_globals() -> Globals {
    let mut builder = GlobalsBuilder::standard().with(job_builtins);
    builder.set("one_minute", 60);
    builder.set("one_hour", 3600);
    builder.set("one_day", 86400);
    builder.build()
}

/// A frozen Starlark value called as `should_run`.
///
/// The owned value keeps its heap alive, so the predicate can outlive the
/// module it was loaded from and be called from any task.
pub struct StarlarkPredicate {
    func: OwnedFrozenValue,
}

impl StarlarkPredicate {
    pub fn new(func: OwnedFrozenValue) -> Self {
        Self { func }
    }
}

impl Predicate for StarlarkPredicate {
    fn call(&self, args: &PredicateArgs) -> Result<bool> {
        let module = Module::new();
        let mut eval = Evaluator::new(&module);
        let heap = module.heap();

        let named: Vec<(&str, Value)> = vec![
            ("minute", heap.alloc(args.minute as i32)),
            ("hour", heap.alloc(args.hour as i32)),
            ("day", heap.alloc(args.day as i32)),
            ("month", heap.alloc(args.month as i32)),
            ("dow", heap.alloc(args.dow as i32)),
            ("timestamp", heap.alloc(args.timestamp)),
            ("exit_status", heap.alloc(args.exit_status)),
            ("started", heap.alloc(args.started)),
            ("finished", heap.alloc(args.finished)),
        ];

        let result = eval
            .eval_function(self.func.value(), &[], &named)
            .map_err(|err| anyhow!("failed to call \"should_run\": {err}"))?;

        result
            .unpack_bool()
            .ok_or_else(|| anyhow!("\"should_run\" returned bad value: {result}"))
    }
}
