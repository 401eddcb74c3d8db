//! Idempotency checks deciding whether a stage's effect is already present.

use super::{CommandSpec, StageDescriptor};
use crate::cancellation::CancellationToken;
use crate::context::RunContext;
use crate::core::StageStatus;
use crate::errors::DescriptorLoadError;
use crate::ledger::LedgerEntry;
use crate::process::ProcessRunner;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Predicate reporting whether a stage is already satisfied.
///
/// Probing variants inspect the host every time; only
/// [`IdempotencyCheck::Ledger`] trusts what earlier runs recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum IdempotencyCheck {
    /// Satisfied only by the ledger.
    #[default]
    Ledger,
    /// Satisfied when the path exists.
    PathExists {
        /// Path to test; relative paths resolve against the target directory.
        path: PathBuf,
    },
    /// Satisfied when the probe command exits 0.
    CommandSucceeds {
        /// Probe command.
        command: CommandSpec,
    },
    /// Satisfied when the probe exits 0 and its output matches `pattern`.
    #[serde(rename_all = "camelCase")]
    BinaryVersion {
        /// Binary to probe.
        program: String,
        /// Probe arguments, usually `--version`.
        #[serde(default)]
        args: Vec<String>,
        /// Regular expression matched against stdout and stderr.
        pattern: String,
    },
    /// Never satisfied; the stage always runs.
    Never,
}

/// Result of evaluating a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The stage's effect is present.
    Satisfied {
        /// Why the stage counts as done.
        reason: String,
    },
    /// The stage must run.
    NotSatisfied,
}

impl CheckOutcome {
    /// Returns true if the stage can be skipped.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied { .. })
    }

    fn satisfied(reason: impl Into<String>) -> Self {
        Self::Satisfied {
            reason: reason.into(),
        }
    }
}

impl IdempotencyCheck {
    /// Creates a version probe running `program --version`.
    #[must_use]
    pub fn binary_version(program: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::BinaryVersion {
            program: program.into(),
            args: vec!["--version".to_string()],
            pattern: pattern.into(),
        }
    }

    /// Validates the check definition.
    ///
    /// # Errors
    ///
    /// Returns an error if a version pattern is not a valid regex.
    pub fn validate(&self, stage_id: &str) -> Result<(), DescriptorLoadError> {
        if let Self::BinaryVersion { pattern, .. } = self {
            Regex::new(pattern).map_err(|source| DescriptorLoadError::Pattern {
                stage: stage_id.to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Evaluates the check for `stage`.
    ///
    /// Probes that cannot launch or exit non-zero count as not satisfied.
    pub async fn evaluate(
        &self,
        stage: &StageDescriptor,
        prior: Option<&LedgerEntry>,
        runner: &dyn ProcessRunner,
        ctx: &RunContext,
        cancel: &Arc<CancellationToken>,
    ) -> CheckOutcome {
        match self {
            Self::Ledger => match prior {
                Some(entry)
                    if entry.status == StageStatus::Succeeded
                        && entry.fingerprint.as_deref() == Some(stage.fingerprint().as_str()) =>
                {
                    CheckOutcome::satisfied("recorded as succeeded in ledger")
                }
                _ => CheckOutcome::NotSatisfied,
            },
            Self::Never => CheckOutcome::NotSatisfied,
            Self::PathExists { path } => {
                let resolved = ctx.resolve_path(path);
                if tokio::fs::try_exists(&resolved).await.unwrap_or(false) {
                    CheckOutcome::satisfied(format!("{} exists", resolved.display()))
                } else {
                    CheckOutcome::NotSatisfied
                }
            }
            Self::CommandSucceeds { command } => {
                let request = ctx.command_request(&stage.id, command);
                match runner.run(request, cancel.clone()).await {
                    Ok(_) => CheckOutcome::satisfied(format!("probe `{command}` succeeded")),
                    Err(err) => {
                        debug!(stage = %stage.id, error = %err, "Probe not satisfied");
                        CheckOutcome::NotSatisfied
                    }
                }
            }
            Self::BinaryVersion {
                program,
                args,
                pattern,
            } => {
                let regex = match Regex::new(pattern) {
                    Ok(regex) => regex,
                    Err(err) => {
                        warn!(stage = %stage.id, error = %err, "Invalid version pattern");
                        return CheckOutcome::NotSatisfied;
                    }
                };
                let probe = CommandSpec::new(program.clone()).with_args(args.iter().cloned());
                let request = ctx.command_request(&stage.id, &probe);
                match runner.run(request, cancel.clone()).await {
                    Ok(outcome) => {
                        if outcome.lines().any(|line| regex.is_match(line)) {
                            CheckOutcome::satisfied(format!("{program} matches /{pattern}/"))
                        } else {
                            debug!(stage = %stage.id, %program, "Installed version does not match");
                            CheckOutcome::NotSatisfied
                        }
                    }
                    Err(err) => {
                        debug!(stage = %stage.id, error = %err, "Version probe not satisfied");
                        CheckOutcome::NotSatisfied
                    }
                }
            }
        }
    }
}
