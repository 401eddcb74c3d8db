//! Per-invocation run configuration.

use crate::process::CommandRequest;
use crate::stages::CommandSpec;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Default grace period granted to in-flight commands after cancellation.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Default number of output lines retained per stream.
pub const DEFAULT_TAIL_LINES: usize = 40;

/// Process-wide configuration for one orchestrator invocation.
///
/// Built once before the run starts and only read afterwards; every
/// component that needs a directory, a parallelism limit or the environment
/// overlay receives it explicitly.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    target_dir: PathBuf,
    parallelism: usize,
    env: BTreeMap<String, String>,
    force: bool,
    grace_period: Duration,
    tail_lines: usize,
}

impl RunContext {
    /// Creates a context rooted at `target_dir` with a single worker.
    #[must_use]
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            target_dir: target_dir.into(),
            parallelism: 1,
            env: BTreeMap::new(),
            force: false,
            grace_period: DEFAULT_GRACE_PERIOD,
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }

    /// Sets the maximum number of concurrently running stages (at least one).
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Adds an environment variable to the overlay.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Extends the environment overlay.
    #[must_use]
    pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Ignores idempotency checks and prior ledger entries.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Sets the grace period for in-flight commands after cancellation.
    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Sets how many output lines are kept per stream.
    #[must_use]
    pub fn with_tail_lines(mut self, lines: usize) -> Self {
        self.tail_lines = lines.max(1);
        self
    }

    /// Returns the unique id of this invocation.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the directory relative command paths resolve against.
    #[must_use]
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Returns the worker limit.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Returns the environment overlay.
    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Returns true if satisfied stages should run anyway.
    #[must_use]
    pub fn force(&self) -> bool {
        self.force
    }

    /// Returns the cancellation grace period.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Returns the per-stream output tail size.
    #[must_use]
    pub fn tail_lines(&self) -> usize {
        self.tail_lines
    }

    /// Resolves a path against the target directory.
    #[must_use]
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.target_dir.join(path)
        }
    }

    /// Builds the fully resolved request for one command of a stage.
    ///
    /// Command-level environment entries win over the context overlay.
    #[must_use]
    pub fn command_request(&self, stage_id: &str, command: &CommandSpec) -> CommandRequest {
        let working_dir = command
            .working_dir
            .as_deref()
            .map_or_else(|| self.target_dir.clone(), |dir| self.resolve_path(dir));

        let mut env = self.env.clone();
        env.extend(command.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        CommandRequest {
            stage_id: stage_id.to_string(),
            command: command.clone(),
            working_dir,
            env,
            timeout: command.timeout_secs.map(Duration::from_secs),
            tail_lines: self.tail_lines,
            grace_period: self.grace_period,
        }
    }
}
