//! Scripted process runner for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::errors::{CommandError, LaunchFailure};
use crate::process::{CommandOutcome, CommandRequest, ProcessRunner};

/// What a scripted program does when invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// Exit 0 printing `stdout`.
    Succeed {
        /// Lines written to stdout.
        stdout: Vec<String>,
    },
    /// Exit with `code` printing `stderr`.
    Fail {
        /// The exit code.
        code: i32,
        /// Lines written to stderr.
        stderr: Vec<String>,
    },
    /// Fail to launch.
    LaunchFailure,
    /// Run for `delay` then exit 0; cancellation interrupts it.
    Slow {
        /// How long the program runs.
        delay: Duration,
    },
}

impl Default for Script {
    fn default() -> Self {
        Self::Succeed { stdout: Vec::new() }
    }
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// The stage that ran the command.
    pub stage_id: String,
    /// The program.
    pub program: String,
    /// The arguments.
    pub args: Vec<String>,
}

/// A [`ProcessRunner`] that never spawns processes.
///
/// Behaviour is looked up by stage id first, then by program name; anything
/// unscripted succeeds silently. Every invocation is recorded together with
/// the peak number of concurrently running commands.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    by_stage: HashMap<String, Script>,
    by_program: HashMap<String, Script>,
    invocations: Mutex<Vec<Invocation>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedRunner {
    /// Creates a runner where every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts `program` to print `lines` and succeed.
    #[must_use]
    pub fn with_stdout(
        mut self,
        program: impl Into<String>,
        lines: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.by_program.insert(
            program.into(),
            Script::Succeed {
                stdout: lines.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    /// Scripts `program` to exit with `code`.
    #[must_use]
    pub fn with_failure(mut self, program: impl Into<String>, code: i32) -> Self {
        let program = program.into();
        self.by_program.insert(
            program.clone(),
            Script::Fail {
                code,
                stderr: vec![format!("{program}: error {code}")],
            },
        );
        self
    }

    /// Scripts `program` so it cannot be launched.
    #[must_use]
    pub fn with_launch_failure(mut self, program: impl Into<String>) -> Self {
        self.by_program.insert(program.into(), Script::LaunchFailure);
        self
    }

    /// Scripts `program` to run for `delay`.
    #[must_use]
    pub fn with_delay(mut self, program: impl Into<String>, delay: Duration) -> Self {
        self.by_program.insert(program.into(), Script::Slow { delay });
        self
    }

    /// Scripts every command of `stage_id`.
    #[must_use]
    pub fn with_stage_script(mut self, stage_id: impl Into<String>, script: Script) -> Self {
        self.by_stage.insert(stage_id.into(), script);
        self
    }

    /// Returns all invocations in call order.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    /// Returns how many commands `stage_id` ran.
    #[must_use]
    pub fn calls_for_stage(&self, stage_id: &str) -> usize {
        self.invocations
            .lock()
            .iter()
            .filter(|i| i.stage_id == stage_id)
            .count()
    }

    /// Returns the stages that ran commands, in first-call order.
    #[must_use]
    pub fn stages_invoked(&self) -> Vec<String> {
        let mut stages: Vec<String> = Vec::new();
        for invocation in self.invocations.lock().iter() {
            if !stages.contains(&invocation.stage_id) {
                stages.push(invocation.stage_id.clone());
            }
        }
        stages
    }

    /// Returns the highest number of commands observed running at once.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn script_for(&self, request: &CommandRequest) -> Script {
        self.by_stage
            .get(&request.stage_id)
            .or_else(|| self.by_program.get(&request.command.program))
            .cloned()
            .unwrap_or_default()
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(
        &self,
        request: CommandRequest,
        cancel: Arc<CancellationToken>,
    ) -> Result<CommandOutcome, CommandError> {
        let program = request.command.program.clone();
        self.invocations.lock().push(Invocation {
            stage_id: request.stage_id.clone(),
            program: program.clone(),
            args: request.command.args.clone(),
        });

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        // Yield so concurrently scheduled stages overlap.
        tokio::task::yield_now().await;

        match self.script_for(&request) {
            Script::Succeed { stdout } => Ok(CommandOutcome {
                stdout_tail: stdout,
                ..CommandOutcome::success(program)
            }),
            Script::Fail { code, stderr } => Err(CommandError::NonZeroExit {
                program,
                code: Some(code),
                output_tail: stderr,
            }),
            Script::LaunchFailure => Err(CommandError::Launch {
                program,
                kind: LaunchFailure::NotFound,
                reason: "No such file or directory (os error 2)".to_string(),
            }),
            Script::Slow { delay } => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => Ok(CommandOutcome {
                        duration: delay,
                        ..CommandOutcome::success(program)
                    }),
                    () = cancel.cancelled() => {
                        match tokio::time::timeout(request.grace_period, tokio::time::sleep(delay)).await {
                            Ok(()) => Ok(CommandOutcome::success(program)),
                            Err(_) => Err(CommandError::Cancelled { program }),
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::stages::CommandSpec;

    #[tokio::test]
    async fn test_scripted_behaviour() {
        let runner = ScriptedRunner::new()
            .with_stdout("cmake", ["cmake version 3.28.3"])
            .with_failure("make", 2)
            .with_launch_failure("python3.11");
        let ctx = RunContext::new("/tmp");
        let token = Arc::new(CancellationToken::new());

        let ok = runner
            .run(ctx.command_request("cmake", &CommandSpec::new("cmake")), token.clone())
            .await
            .unwrap();
        assert_eq!(ok.stdout_tail, vec!["cmake version 3.28.3"]);

        let err = runner
            .run(ctx.command_request("cmake", &CommandSpec::new("make")), token.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NonZeroExit { code: Some(2), .. }));

        let err = runner
            .run(ctx.command_request("python", &CommandSpec::new("python3.11")), token)
            .await
            .unwrap_err();
        assert!(err.is_launch_error());

        assert_eq!(runner.invocations().len(), 3);
        assert_eq!(runner.calls_for_stage("cmake"), 2);
        assert_eq!(runner.stages_invoked(), vec!["cmake", "python"]);
    }

    #[tokio::test]
    async fn test_stage_script_wins_over_program() {
        let runner = ScriptedRunner::new()
            .with_stdout("make", ["ok"])
            .with_stage_script("python", Script::Fail { code: 1, stderr: Vec::new() });
        let ctx = RunContext::new("/tmp");
        let token = Arc::new(CancellationToken::new());

        let result = runner
            .run(ctx.command_request("python", &CommandSpec::new("make")), token)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_slow_script_cancelled() {
        let runner = ScriptedRunner::new().with_delay("make", Duration::from_secs(30));
        let ctx = RunContext::new("/tmp").with_grace_period(Duration::from_millis(10));
        let token = Arc::new(CancellationToken::new());
        token.cancel("test");

        let err = runner
            .run(ctx.command_request("python", &CommandSpec::new("make")), token)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Cancelled { .. }));
    }
}
