//! Error types for the buildflow orchestrator.
//!
//! Plan-construction errors abort a run before anything executes. Command
//! errors are scoped to one stage and surface as [`StageFailedError`] at the
//! stage boundary.

use crate::core::StageStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for buildflow operations.
#[derive(Debug, Error)]
pub enum BuildflowError {
    /// The descriptor set could not be turned into a plan.
    #[error("{0}")]
    Plan(#[from] PlanError),

    /// A descriptor file could not be read or parsed.
    #[error("{0}")]
    DescriptorLoad(#[from] DescriptorLoadError),

    /// A stage failed during execution.
    #[error("{0}")]
    StageFailed(#[from] StageFailedError),

    /// The run ledger rejected a write or could not be persisted.
    #[error("{0}")]
    Ledger(#[from] LedgerError),

    /// Configuration could not be assembled.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildflowError {
    /// Returns true for errors raised before any stage could execute.
    #[must_use]
    pub fn is_setup_error(&self) -> bool {
        matches!(self, Self::Plan(_) | Self::DescriptorLoad(_) | Self::Config(_))
    }
}

/// Metadata about a validation error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "PLAN-001-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a descriptor set fails structural validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }
}

/// Error raised when the dependency relation contains a cycle.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected between stages: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle; the first id is repeated at the end.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "PLAN-001-CYCLE",
            format!("Stages depend on each other in a loop: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }

    /// Returns the distinct stage ids taking part in the cycle.
    #[must_use]
    pub fn stages(&self) -> Vec<String> {
        let mut seen = Vec::with_capacity(self.cycle_path.len());
        for id in &self.cycle_path {
            if !seen.contains(id) {
                seen.push(id.clone());
            }
        }
        seen
    }
}

/// Error raised when a stage depends on an id no descriptor declares.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}' depends on unknown stage '{missing}'")]
pub struct UnknownDependencyError {
    /// The stage declaring the dependency.
    pub stage: String,
    /// The id that does not exist.
    pub missing: String,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl UnknownDependencyError {
    /// Creates a new unknown dependency error.
    #[must_use]
    pub fn new(stage: impl Into<String>, missing: impl Into<String>) -> Self {
        let stage = stage.into();
        let missing = missing.into();
        let info = ContractErrorInfo::new(
            "PLAN-002-MISSING_DEP",
            format!("Dependency '{missing}' not found"),
        )
        .with_fix_hint("Check the dependency for typos or add a descriptor with that id.")
        .with_context_entry("stage", stage.clone());

        Self {
            stage,
            missing,
            error_info: info,
        }
    }
}

/// Errors raised while turning descriptors into an execution plan.
#[derive(Debug, Clone, Error)]
pub enum PlanError {
    /// The dependency relation is cyclic.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// A dependency references a missing stage.
    #[error("{0}")]
    UnknownDependency(#[from] UnknownDependencyError),

    /// A requested stage id is not declared.
    #[error("Unknown stage requested: '{0}'")]
    UnknownStage(String),

    /// Structural validation failed (duplicate or empty ids, empty set).
    #[error("{0}")]
    Invalid(#[from] PipelineValidationError),
}

impl PlanError {
    /// Returns the contract error info attached to this error, if any.
    #[must_use]
    pub fn error_info(&self) -> Option<&ContractErrorInfo> {
        match self {
            Self::CycleDetected(e) => Some(&e.error_info),
            Self::UnknownDependency(e) => Some(&e.error_info),
            Self::UnknownStage(_) => None,
            Self::Invalid(e) => e.error_info.as_ref(),
        }
    }
}

/// Error raised when a descriptor file cannot be loaded.
#[derive(Debug, Error)]
pub enum DescriptorLoadError {
    /// The file could not be read.
    #[error("Failed to read stage descriptors from {path}: {source}")]
    Read {
        /// The descriptor file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file contents are not a valid descriptor document.
    #[error("Failed to parse stage descriptors{}: {source}", path.as_ref().map(|p| format!(" from {}", p.display())).unwrap_or_default())]
    Parse {
        /// The descriptor file path, when loaded from disk.
        path: Option<PathBuf>,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A check pattern is not a valid regular expression.
    #[error("Stage '{stage}' has an invalid version pattern: {source}")]
    Pattern {
        /// The stage declaring the check.
        stage: String,
        /// The underlying regex error.
        #[source]
        source: regex::Error,
    },
}

/// Why a command could not be launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchFailure {
    /// The program was not found.
    NotFound,
    /// The program exists but may not be executed.
    PermissionDenied,
    /// The working directory does not exist.
    WorkingDirectory,
    /// Any other spawn failure.
    Other,
}

impl From<std::io::ErrorKind> for LaunchFailure {
    fn from(kind: std::io::ErrorKind) -> Self {
        match kind {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Other,
        }
    }
}

/// Errors produced by a single external command.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The command could not be attempted.
    #[error("Failed to launch '{program}': {reason}")]
    Launch {
        /// The program that failed to launch.
        program: String,
        /// Classified launch failure.
        kind: LaunchFailure,
        /// Human-readable reason.
        reason: String,
    },

    /// The command ran and reported failure.
    #[error("'{program}' {}", describe_exit(*code))]
    NonZeroExit {
        /// The program that failed.
        program: String,
        /// Exit code, absent when the process was terminated by a signal.
        code: Option<i32>,
        /// Tail of the combined stdout and stderr.
        output_tail: Vec<String>,
    },

    /// The command exceeded its timeout and was killed.
    #[error("'{program}' timed out after {timeout_secs}s")]
    TimedOut {
        /// The program that timed out.
        program: String,
        /// The configured timeout.
        timeout_secs: u64,
        /// Tail of the combined stdout and stderr.
        output_tail: Vec<String>,
    },

    /// The command was interrupted by cancellation.
    #[error("'{program}' was cancelled")]
    Cancelled {
        /// The program that was interrupted.
        program: String,
    },
}

fn describe_exit(code: Option<i32>) -> String {
    code.map_or_else(
        || "was terminated by a signal".to_string(),
        |c| format!("exited with status {c}"),
    )
}

impl CommandError {
    /// Builds a launch error from a spawn failure.
    #[must_use]
    pub fn launch(program: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Launch {
            program: program.into(),
            kind: err.kind().into(),
            reason: err.to_string(),
        }
    }

    /// Returns true when the command never started.
    #[must_use]
    pub fn is_launch_error(&self) -> bool {
        matches!(self, Self::Launch { .. })
    }

    /// Returns the captured output tail, if the command produced any.
    #[must_use]
    pub fn output_tail(&self) -> &[String] {
        match self {
            Self::NonZeroExit { output_tail, .. } | Self::TimedOut { output_tail, .. } => output_tail,
            Self::Launch { .. } | Self::Cancelled { .. } => &[],
        }
    }
}

/// The reason a stage ended in `Failed`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageFailureCause {
    /// One of the stage's commands failed.
    #[error(transparent)]
    Command(CommandError),

    /// The run was cancelled while the stage was in flight.
    #[error("cancelled before completion")]
    Cancelled,

    /// The stage task itself crashed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CommandError> for StageFailureCause {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Cancelled { .. } => Self::Cancelled,
            other => Self::Command(other),
        }
    }
}

/// A stage failed; its transitive dependents are blocked.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Stage '{stage_id}' failed: {cause}")]
pub struct StageFailedError {
    /// The failed stage.
    pub stage_id: String,
    /// What made it fail.
    #[source]
    pub cause: StageFailureCause,
}

impl StageFailedError {
    /// Creates a new stage failure.
    #[must_use]
    pub fn new(stage_id: impl Into<String>, cause: impl Into<StageFailureCause>) -> Self {
        Self {
            stage_id: stage_id.into(),
            cause: cause.into(),
        }
    }

    /// Returns true if the stage was interrupted by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause, StageFailureCause::Cancelled)
    }
}

/// Errors raised by the run ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A stage already reached a terminal state in this invocation, or the
    /// requested transition is not allowed.
    #[error("Ledger conflict for stage '{stage_id}': cannot move from {from} to {to}")]
    Conflict {
        /// The stage being written.
        stage_id: String,
        /// The status recorded in this invocation.
        from: StageStatus,
        /// The rejected status.
        to: StageStatus,
    },

    /// The ledger file could not be read or written.
    #[error("Ledger IO error at {path}: {source}")]
    Io {
        /// The ledger path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// An entry could not be serialized.
    #[error("Ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while assembling configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A configuration value could not be parsed.
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue {
        /// The setting name.
        key: String,
        /// The rejected value.
        value: String,
    },
}

/// Provides default suggestions for common plan error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "PLAN-001-CYCLE" => Some(
                "Check your stage dependencies for circular references. \
                 A build chain should only point at stages that must finish first.",
            ),
            "PLAN-002-MISSING_DEP" => Some(
                "Ensure all dependencies reference stages that exist in the descriptor file. \
                 Check for typos in stage ids.",
            ),
            "PLAN-003-DUPLICATE" => Some("Each stage id may only be declared once."),
            "PLAN-004-EMPTY" => Some("Declare at least one stage in the descriptor file."),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "cmake");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"cmake".to_string()));
    }

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "a".to_string(),
        ]);

        assert!(err.to_string().contains("a -> b -> c -> a"));
        assert_eq!(err.error_info.code, "PLAN-001-CYCLE");
        assert_eq!(err.stages(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unknown_dependency_error() {
        let err = UnknownDependencyError::new("python", "cmak");
        assert_eq!(err.to_string(), "Stage 'python' depends on unknown stage 'cmak'");
        assert_eq!(err.error_info.context.get("stage"), Some(&"python".to_string()));

        let plan_err = PlanError::from(err);
        assert_eq!(plan_err.error_info().map(|i| i.code.as_str()), Some("PLAN-002-MISSING_DEP"));
    }

    #[test]
    fn test_command_error_display() {
        let err = CommandError::NonZeroExit {
            program: "make".to_string(),
            code: Some(2),
            output_tail: vec!["error: missing header".to_string()],
        };
        assert_eq!(err.to_string(), "'make' exited with status 2");
        assert_eq!(err.output_tail().len(), 1);

        let killed = CommandError::NonZeroExit {
            program: "make".to_string(),
            code: None,
            output_tail: Vec::new(),
        };
        assert_eq!(killed.to_string(), "'make' was terminated by a signal");
    }

    #[test]
    fn test_launch_error_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = CommandError::launch("cmake", &io);
        assert!(err.is_launch_error());
        assert!(matches!(err, CommandError::Launch { kind: LaunchFailure::NotFound, .. }));

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(
            CommandError::launch("cmake", &io),
            CommandError::Launch { kind: LaunchFailure::PermissionDenied, .. }
        ));
    }

    #[test]
    fn test_cancelled_command_maps_to_cancelled_cause() {
        let err = StageFailedError::new(
            "python",
            CommandError::Cancelled { program: "make".to_string() },
        );
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "Stage 'python' failed: cancelled before completion");
    }

    #[test]
    fn test_setup_error_classification() {
        let err = BuildflowError::from(PlanError::UnknownStage("x".to_string()));
        assert!(err.is_setup_error());

        let err = BuildflowError::from(StageFailedError::new("x", StageFailureCause::Cancelled));
        assert!(!err.is_setup_error());
    }

    #[test]
    fn test_contract_suggestions() {
        assert!(ContractSuggestions::get("PLAN-001-CYCLE").is_some());
        assert!(ContractSuggestions::get("UNKNOWN").is_none());
    }
}
