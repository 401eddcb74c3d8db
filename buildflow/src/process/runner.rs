//! Process runner executing external commands.

use super::output::{combined_tail, CommandOutcome, OutputTail};
use crate::cancellation::CancellationToken;
use crate::errors::{CommandError, LaunchFailure};
use crate::events::{EventSink, COMMAND_FINISHED, COMMAND_OUTPUT, COMMAND_STARTED};
use crate::stages::CommandSpec;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to keep reading output after the process exited.
///
/// Build tools occasionally leave daemons holding the pipes open.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bytes kept from a single output line; the rest up to the newline is dropped.
pub const MAX_LINE_BYTES: usize = 4096;

const TRUNCATED_MARKER: &str = " [truncated]";

/// A fully resolved command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Stage the command belongs to (used to label output).
    pub stage_id: String,
    /// The command as declared.
    pub command: CommandSpec,
    /// Absolute working directory.
    pub working_dir: PathBuf,
    /// Environment overlay applied on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Kill the process after this long.
    pub timeout: Option<Duration>,
    /// Lines kept per output stream.
    pub tail_lines: usize,
    /// How long an in-flight command may keep running after cancellation.
    pub grace_period: Duration,
}

/// Executes a single external command.
///
/// `Ok` is returned only for exit status 0. A command that could not start
/// fails with [`CommandError::Launch`]; one that ran and failed with
/// [`CommandError::NonZeroExit`].
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs the command described by `request`.
    async fn run(
        &self,
        request: CommandRequest,
        cancel: Arc<CancellationToken>,
    ) -> Result<CommandOutcome, CommandError>;
}

/// Runner backed by the operating system's process launcher.
#[derive(Clone)]
pub struct SystemProcessRunner {
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for SystemProcessRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemProcessRunner").finish_non_exhaustive()
    }
}

enum Interrupt {
    Cancelled,
    TimedOut,
}

impl SystemProcessRunner {
    /// Creates a runner streaming output lines to `events`.
    #[must_use]
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self { events }
    }

    fn capture<R>(&self, reader: R, stage_id: &str, stream: &'static str, capacity: usize) -> JoinHandle<OutputTail>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let events = self.events.clone();
        let stage_id = stage_id.to_string();
        tokio::spawn(async move {
            let mut tail = OutputTail::new(capacity);
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                let read = (&mut reader)
                    .take(MAX_LINE_BYTES as u64 + 1)
                    .read_until(b'\n', &mut buf)
                    .await;
                match read {
                    Ok(0) => break,
                    Ok(_) => {
                        let overlong = buf.len() > MAX_LINE_BYTES && buf.last() != Some(&b'\n');
                        if overlong {
                            buf.truncate(MAX_LINE_BYTES);
                            if let Err(err) = skip_rest_of_line(&mut reader).await {
                                debug!(stage = %stage_id, stream, error = %err, "Output stream closed");
                            }
                        }
                        let mut line = String::from_utf8_lossy(&buf)
                            .trim_end_matches(|c| c == '\r' || c == '\n')
                            .to_string();
                        if overlong {
                            line.push_str(TRUNCATED_MARKER);
                        }
                        events.try_emit(
                            COMMAND_OUTPUT,
                            Some(serde_json::json!({
                                "stage": &stage_id,
                                "stream": stream,
                                "line": &line,
                            })),
                        );
                        tail.push(line);
                    }
                    Err(err) => {
                        debug!(stage = %stage_id, stream, error = %err, "Output stream closed");
                        break;
                    }
                }
            }
            tail
        })
    }
}

async fn skip_rest_of_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        if let Some(end) = available.iter().position(|&b| b == b'\n') {
            reader.consume(end + 1);
            return Ok(());
        }
        let len = available.len();
        reader.consume(len);
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

async fn drain(handle: Option<JoinHandle<OutputTail>>) -> Vec<String> {
    let Some(handle) = handle else {
        return Vec::new();
    };
    match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, handle).await {
        Ok(Ok(tail)) => tail.into_lines(),
        Ok(Err(err)) => {
            warn!(error = %err, "Output reader task failed");
            Vec::new()
        }
        Err(_) => {
            warn!("Timed out draining command output");
            Vec::new()
        }
    }
}

async fn terminate(child: &mut Child, program: &str) {
    if let Err(err) = child.kill().await {
        warn!(%program, error = %err, "Failed to kill command");
    }
}

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn run(
        &self,
        request: CommandRequest,
        cancel: Arc<CancellationToken>,
    ) -> Result<CommandOutcome, CommandError> {
        let program = request.command.program.clone();

        if !request.working_dir.is_dir() {
            return Err(CommandError::Launch {
                program,
                kind: LaunchFailure::WorkingDirectory,
                reason: format!(
                    "working directory {} does not exist",
                    request.working_dir.display()
                ),
            });
        }

        let mut cmd = Command::new(&program);
        cmd.args(&request.command.args)
            .current_dir(&request.working_dir)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|err| CommandError::launch(&program, &err))?;

        debug!(stage = %request.stage_id, command = %request.command, "Command launched");
        self.events.try_emit(
            COMMAND_STARTED,
            Some(serde_json::json!({
                "stage": &request.stage_id,
                "command": request.command.to_string(),
                "working_dir": request.working_dir.display().to_string(),
            })),
        );

        let stdout = child
            .stdout
            .take()
            .map(|s| self.capture(s, &request.stage_id, "stdout", request.tail_lines));
        let stderr = child
            .stderr
            .take()
            .map(|s| self.capture(s, &request.stage_id, "stderr", request.tail_lines));

        let waited = tokio::select! {
            status = child.wait() => Ok(status),
            () = cancel.cancelled() => Err(Interrupt::Cancelled),
            () = deadline(request.timeout) => Err(Interrupt::TimedOut),
        };

        let status = match waited {
            Ok(status) => status,
            Err(Interrupt::Cancelled) => {
                debug!(
                    stage = %request.stage_id,
                    grace_ms = millis(request.grace_period),
                    "Cancellation requested, waiting for in-flight command"
                );
                match tokio::time::timeout(request.grace_period, child.wait()).await {
                    Ok(Ok(status)) if !status.success() => {
                        debug!(stage = %request.stage_id, %program, ?status, "Command exited after cancellation");
                        drain(stdout).await;
                        drain(stderr).await;
                        return Err(CommandError::Cancelled { program });
                    }
                    Ok(status) => status,
                    Err(_) => {
                        warn!(stage = %request.stage_id, %program, "Grace period elapsed, killing command");
                        terminate(&mut child, &program).await;
                        drain(stdout).await;
                        drain(stderr).await;
                        return Err(CommandError::Cancelled { program });
                    }
                }
            }
            Err(Interrupt::TimedOut) => {
                warn!(stage = %request.stage_id, %program, "Command timed out, killing it");
                terminate(&mut child, &program).await;
                let output_tail = combined_tail(
                    drain(stdout).await,
                    drain(stderr).await,
                    request.tail_lines,
                );
                return Err(CommandError::TimedOut {
                    program,
                    timeout_secs: request.timeout.map_or(0, |t| t.as_secs()),
                    output_tail,
                });
            }
        };

        let status = status.map_err(|err| CommandError::Launch {
            program: program.clone(),
            kind: LaunchFailure::Other,
            reason: format!("failed to wait for process: {err}"),
        })?;

        let stdout_tail = drain(stdout).await;
        let stderr_tail = drain(stderr).await;
        let duration = started.elapsed();

        self.events.try_emit(
            COMMAND_FINISHED,
            Some(serde_json::json!({
                "stage": &request.stage_id,
                "command": request.command.to_string(),
                "exit_code": status.code(),
                "duration_ms": millis(duration),
            })),
        );

        if status.success() {
            Ok(CommandOutcome {
                program,
                exit_code: 0,
                stdout_tail,
                stderr_tail,
                duration,
            })
        } else {
            Err(CommandError::NonZeroExit {
                program,
                code: status.code(),
                output_tail: combined_tail(stdout_tail, stderr_tail, request.tail_lines),
            })
        }
    }
}
