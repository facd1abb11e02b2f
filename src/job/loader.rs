// src/job/loader.rs

//! Loading a job: env layering plus evaluation of its Starlark module.
//!
//! A module runs once at load time with `env`, `quote`, and the duration
//! constants predeclared, and assigns any subset of `command`, `duplicate`,
//! `enabled`, `env`, `jitter`, `log`, `notify`, `queue`, `should_run`.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use starlark::environment::Module;
use starlark::eval::Evaluator;
use starlark::syntax::{AstModule, Dialect};
use starlark::values::dict::{AllocDict, DictRef};
use starlark::values::list::ListRef;
use starlark::values::OwnedFrozenValue;

use crate::envfile::{self, Env};
use crate::job::config::{JobConfig, NotifyMode};
use crate::job::predicate::{job_globals, StarlarkPredicate};
use crate::paths::{self, GLOBAL_ENV_FILE_NAME, JOB_DIR_ENV_VAR, JOB_ENV_FILE_NAME};

/// Env layering for one job: process env, then `config_root/global.env`,
/// then `job_dir/job.env` (later wins), then a synthesized `JOB_DIR`.
pub fn layered_env(config_root: &Path, job_dir: &Path) -> Result<Env> {
    let mut env = envfile::os_env();

    let layers = [
        ("global", config_root.join(GLOBAL_ENV_FILE_NAME)),
        ("job", job_dir.join(JOB_ENV_FILE_NAME)),
    ];

    for (label, path) in layers {
        let loaded = envfile::load(&path, true, &env)
            .with_context(|| format!("failed to load {label} env file"))?;
        env = envfile::merge(env, loaded);
    }

    env.insert(
        JOB_DIR_ENV_VAR.to_string(),
        job_dir.to_string_lossy().into_owned(),
    );

    Ok(env)
}

/// Layer the environment and evaluate the job module at `config_path`.
pub fn load(config_root: &Path, config_path: &Path) -> Result<JobConfig> {
    let job_dir = paths::job_dir(config_path);
    let env = layered_env(config_root, &job_dir)?;
    load_job(env, config_path)
}

/// Evaluate a job module with the given prepopulated environment.
pub fn load_job(env: Env, config_path: &Path) -> Result<JobConfig> {
    let mut job = JobConfig::new(paths::job_name_from_path(config_path));

    let content = fs::read_to_string(config_path)
        .with_context(|| format!("reading job config {:?}", config_path))?;

    let ast = AstModule::parse(
        &config_path.to_string_lossy(),
        content,
        &Dialect::Standard,
    )
    .map_err(|err| anyhow!("failed to parse job module: {err}"))?;

    let globals = job_globals();
    let module = Module::new();

    let env_dict = module
        .heap()
        .alloc(AllocDict(env.iter().map(|(k, v)| (k.as_str(), v.as_str()))));
    module.set("env", env_dict);

    {
        let mut eval = Evaluator::new(&module);
        eval.eval_module(ast, &globals)
            .map_err(|err| anyhow!("failed to evaluate job module: {err}"))?;
    }

    let frozen = module
        .freeze()
        .map_err(|err| anyhow!("failed to freeze job module: {err}"))?;

    let names: HashSet<String> = frozen.names().map(|n| n.as_str().to_string()).collect();
    let get = |name: &str| -> Result<Option<OwnedFrozenValue>> {
        if !names.contains(name) {
            return Ok(None);
        }
        frozen
            .get(name)
            .map(Some)
            .map_err(|err| anyhow!("reading \"{name}\": {err}"))
    };

    if let Some(v) = get("command")? {
        let list = ListRef::from_value(v.value())
            .ok_or_else(|| anyhow!("\"command\" must be a list of strings"))?;
        job.command = list
            .iter()
            .map(|item| {
                item.unpack_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("\"command\" element {item} isn't a string"))
            })
            .collect::<Result<Vec<String>>>()?;
    }

    if let Some(v) = get("duplicate")? {
        job.duplicate = v
            .value()
            .unpack_bool()
            .ok_or_else(|| anyhow!("\"duplicate\" must be a Boolean"))?;
    }

    if let Some(v) = get("enabled")? {
        job.enabled = v
            .value()
            .unpack_bool()
            .ok_or_else(|| anyhow!("\"enabled\" must be a Boolean"))?;
    }

    if let Some(v) = get("log")? {
        job.log = v
            .value()
            .unpack_bool()
            .ok_or_else(|| anyhow!("\"log\" must be a Boolean"))?;
    }

    if let Some(v) = get("jitter")? {
        let seconds = v
            .value()
            .unpack_i32()
            .ok_or_else(|| anyhow!("\"jitter\" must be an integer number of seconds"))?;
        if seconds < 0 {
            bail!("\"jitter\" must be non-negative");
        }
        job.jitter = Duration::from_secs(seconds as u64);
    }

    if let Some(v) = get("notify")? {
        let mode = v
            .value()
            .unpack_str()
            .ok_or_else(|| anyhow!("\"notify\" must be a string"))?;
        job.notify_mode = mode.parse::<NotifyMode>().map_err(|err| anyhow!(err))?;
    }

    if let Some(v) = get("queue")? {
        job.queue = v
            .value()
            .unpack_str()
            .ok_or_else(|| anyhow!("\"queue\" must be a string"))?
            .to_string();
    }

    if let Some(v) = get("should_run")? {
        job.should_run = Some(Arc::new(StarlarkPredicate::new(v)));
    }

    // The module may have mutated or replaced `env`; whatever it ends up
    // bound to becomes the job's effective environment.
    let final_env = get("env")?.ok_or_else(|| anyhow!("\"env\" binding is missing"))?;
    let dict = DictRef::from_value(final_env.value())
        .ok_or_else(|| anyhow!("\"env\" isn't a dictionary"))?;

    job.env = Env::new();
    for (key, value) in dict.iter() {
        let key = key
            .unpack_str()
            .ok_or_else(|| anyhow!("\"env\" key {key} must be a string"))?;
        let value = value
            .unpack_str()
            .ok_or_else(|| anyhow!("\"env\" value {value} must be a string"))?;
        job.env.insert(key.to_string(), value.to_string());
    }

    if job.command.is_empty() {
        job.command = vec!["./job".to_string()];
    }

    Ok(job)
}
