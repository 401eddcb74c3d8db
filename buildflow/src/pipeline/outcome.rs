//! Per-stage reports and the overall run outcome.

use crate::core::StageStatus;
use crate::errors::StageFailedError;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// What happened to one stage during an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    /// The stage id.
    pub stage_id: String,
    /// Final status; `Pending` means the stage never started.
    pub status: StageStatus,
    /// Why the stage was skipped, when its check was satisfied.
    pub satisfied_by: Option<String>,
    /// The failure, when the stage failed.
    pub failure: Option<StageFailedError>,
    /// The failed dependency, when the stage was blocked.
    pub blocked_by: Option<String>,
    /// Tail of the output of the last command that ran.
    pub output_tail: Vec<String>,
    /// Wall-clock time spent on the stage.
    pub duration: Duration,
}

impl StageReport {
    fn with_status(stage_id: impl Into<String>, status: StageStatus) -> Self {
        Self {
            stage_id: stage_id.into(),
            status,
            satisfied_by: None,
            failure: None,
            blocked_by: None,
            output_tail: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// The stage ran all of its commands successfully.
    #[must_use]
    pub fn succeeded(stage_id: impl Into<String>, output_tail: Vec<String>, duration: Duration) -> Self {
        Self {
            output_tail,
            duration,
            ..Self::with_status(stage_id, StageStatus::Succeeded)
        }
    }

    /// The stage was already satisfied and did not run.
    #[must_use]
    pub fn satisfied(stage_id: impl Into<String>, reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            satisfied_by: Some(reason.into()),
            duration,
            ..Self::with_status(stage_id, StageStatus::Succeeded)
        }
    }

    /// The stage failed.
    #[must_use]
    pub fn failed(failure: StageFailedError, duration: Duration) -> Self {
        let output_tail = match &failure.cause {
            crate::errors::StageFailureCause::Command(err) => err.output_tail().to_vec(),
            _ => Vec::new(),
        };
        Self {
            failure: Some(failure.clone()),
            output_tail,
            duration,
            ..Self::with_status(failure.stage_id, StageStatus::Failed)
        }
    }

    /// The stage did not run because `dependency` failed.
    #[must_use]
    pub fn blocked(stage_id: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self {
            blocked_by: Some(dependency.into()),
            ..Self::with_status(stage_id, StageStatus::Blocked)
        }
    }

    /// The stage never started.
    #[must_use]
    pub fn not_run(stage_id: impl Into<String>) -> Self {
        Self::with_status(stage_id, StageStatus::Pending)
    }

    /// Returns true if the stage was skipped as already satisfied.
    #[must_use]
    pub fn was_satisfied(&self) -> bool {
        self.satisfied_by.is_some()
    }
}

/// Number of stages per final status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// Stages that ran and succeeded.
    pub succeeded: usize,
    /// Stages skipped as already satisfied (included in `succeeded`).
    pub satisfied: usize,
    /// Stages that failed.
    pub failed: usize,
    /// Stages blocked by a failed dependency.
    pub blocked: usize,
    /// Stages that never started.
    pub not_run: usize,
}

/// Result of executing a plan.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The invocation id.
    pub run_id: Uuid,
    /// One report per planned stage, in plan order.
    pub stages: Vec<StageReport>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
    /// Total wall-clock time.
    pub duration: Duration,
}

impl RunOutcome {
    /// Returns true if every planned stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.stages.iter().all(|s| s.status == StageStatus::Succeeded)
    }

    /// Returns the report for `stage_id`.
    #[must_use]
    pub fn report(&self, stage_id: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage_id == stage_id)
    }

    /// Returns the final status of `stage_id`.
    #[must_use]
    pub fn status(&self, stage_id: &str) -> Option<StageStatus> {
        self.report(stage_id).map(|s| s.status)
    }

    /// Returns the failures in plan order.
    #[must_use]
    pub fn failures(&self) -> Vec<&StageFailedError> {
        self.stages.iter().filter_map(|s| s.failure.as_ref()).collect()
    }

    /// Counts the stages per final status.
    #[must_use]
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for stage in &self.stages {
            match stage.status {
                StageStatus::Succeeded => {
                    counts.succeeded += 1;
                    if stage.was_satisfied() {
                        counts.satisfied += 1;
                    }
                }
                StageStatus::Failed => counts.failed += 1,
                StageStatus::Blocked => counts.blocked += 1,
                StageStatus::Pending | StageStatus::Running => counts.not_run += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CommandError, StageFailureCause};
    use pretty_assertions::assert_eq;

    fn outcome() -> RunOutcome {
        let failure = StageFailedError::new(
            "cmake",
            CommandError::NonZeroExit {
                program: "make".to_string(),
                code: Some(2),
                output_tail: vec!["make: *** [all] Error 2".to_string()],
            },
        );
        RunOutcome {
            run_id: Uuid::now_v7(),
            stages: vec![
                StageReport::satisfied("ninja", "ninja matches /1\\.11/", Duration::ZERO),
                StageReport::failed(failure, Duration::from_secs(3)),
                StageReport::blocked("python", "cmake"),
                StageReport::not_run("docs"),
            ],
            cancelled: false,
            duration: Duration::from_secs(3),
        }
    }

    #[test]
    fn test_counts() {
        assert_eq!(
            outcome().counts(),
            StatusCounts {
                succeeded: 1,
                satisfied: 1,
                failed: 1,
                blocked: 1,
                not_run: 1,
            }
        );
    }

    #[test]
    fn test_failed_report_keeps_output_tail() {
        let outcome = outcome();
        let cmake = outcome.report("cmake").unwrap();
        assert_eq!(cmake.output_tail, vec!["make: *** [all] Error 2"]);
        assert!(!outcome.is_success());
        assert_eq!(outcome.failures().len(), 1);
    }

    #[test]
    fn test_cancelled_failure_has_no_tail() {
        let report = StageReport::failed(
            StageFailedError::new("python", StageFailureCause::Cancelled),
            Duration::ZERO,
        );
        assert!(report.output_tail.is_empty());
        assert_eq!(report.status, StageStatus::Failed);
    }
}
