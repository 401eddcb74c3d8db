//! Terminal summary of an invocation.

use crate::core::StageStatus;
use crate::pipeline::{RunOutcome, StageReport, StatusCounts};
use serde::Serialize;
use std::fmt::Write as _;
use uuid::Uuid;

/// Exit code for a run where every planned stage succeeded.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code for a run where some stage failed, was blocked, or never ran.
pub const EXIT_STAGE_FAILURE: i32 = 1;

/// Exit code for descriptor, graph and usage errors.
pub const EXIT_SETUP_FAILURE: i32 = 2;

/// One line of the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSummary {
    /// The stage id.
    pub stage_id: String,
    /// Status label; never-started stages read `not_run`.
    pub status: String,
    /// Satisfaction reason, failure cause, or blocking dependency.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Wall-clock time in milliseconds.
    pub duration_ms: u64,
    /// Output tail, kept for failed stages only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output_tail: Vec<String>,
}

impl From<&StageReport> for StageSummary {
    fn from(report: &StageReport) -> Self {
        let status = match report.status {
            StageStatus::Pending | StageStatus::Running => "not_run".to_string(),
            StageStatus::Succeeded if report.was_satisfied() => "satisfied".to_string(),
            other => other.to_string(),
        };
        let detail = report
            .satisfied_by
            .clone()
            .or_else(|| report.failure.as_ref().map(|f| f.cause.to_string()))
            .or_else(|| {
                report
                    .blocked_by
                    .as_ref()
                    .map(|dep| format!("dependency '{dep}' failed"))
            });
        let output_tail = if report.status == StageStatus::Failed {
            report.output_tail.clone()
        } else {
            Vec::new()
        };

        Self {
            stage_id: report.stage_id.clone(),
            status,
            detail,
            duration_ms: u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            output_tail,
        }
    }
}

/// Serializable summary of a [`RunOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// The invocation id.
    pub run_id: Uuid,
    /// Whether every planned stage succeeded.
    pub success: bool,
    /// Whether the run was cancelled.
    pub cancelled: bool,
    /// Total wall-clock time in milliseconds.
    pub duration_ms: u64,
    /// Stages per final status.
    pub counts: StatusCounts,
    /// Per-stage lines in plan order.
    pub stages: Vec<StageSummary>,
}

impl RunReport {
    /// Builds the report for `outcome`.
    #[must_use]
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        Self {
            run_id: outcome.run_id,
            success: outcome.is_success(),
            cancelled: outcome.cancelled,
            duration_ms: u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
            counts: outcome.counts(),
            stages: outcome.stages.iter().map(StageSummary::from).collect(),
        }
    }

    /// Process exit code for this run.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.success {
            EXIT_SUCCESS
        } else {
            EXIT_STAGE_FAILURE
        }
    }

    /// Renders the human-readable summary.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let width = self
            .stages
            .iter()
            .map(|s| s.stage_id.len())
            .max()
            .unwrap_or(0);

        for stage in &self.stages {
            let _ = write!(out, "  {:<width$}  {:<9}", stage.stage_id, stage.status);
            if let Some(detail) = &stage.detail {
                let _ = write!(out, "  {detail}");
            }
            out.push('\n');
            for line in &stage.output_tail {
                let _ = writeln!(out, "      | {line}");
            }
        }

        let c = self.counts;
        let _ = writeln!(
            out,
            "{} succeeded ({} already satisfied), {} failed, {} blocked, {} not run in {}ms{}",
            c.succeeded,
            c.satisfied,
            c.failed,
            c.blocked,
            c.not_run,
            self.duration_ms,
            if self.cancelled { " (cancelled)" } else { "" },
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CommandError, StageFailedError, StageFailureCause};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn failed_outcome() -> RunOutcome {
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
                StageReport::failed(failure, Duration::from_millis(1500)),
                StageReport::blocked("python", "cmake"),
                StageReport::blocked("simpleitk", "cmake"),
            ],
            cancelled: false,
            duration: Duration::from_millis(1500),
        }
    }

    #[test]
    fn test_failed_run_report() {
        let report = RunReport::from_outcome(&failed_outcome());

        assert!(!report.success);
        assert_eq!(report.exit_code(), EXIT_STAGE_FAILURE);
        assert_eq!(report.counts.failed, 1);
        assert_eq!(report.counts.blocked, 2);

        let cmake = &report.stages[0];
        assert_eq!(cmake.status, "failed");
        assert_eq!(cmake.detail.as_deref(), Some("'make' exited with status 2"));
        assert_eq!(cmake.output_tail, vec!["make: *** [all] Error 2"]);
        assert_eq!(cmake.duration_ms, 1500);

        let python = &report.stages[1];
        assert_eq!(python.status, "blocked");
        assert_eq!(python.detail.as_deref(), Some("dependency 'cmake' failed"));
        assert!(python.output_tail.is_empty());
    }

    #[test]
    fn test_successful_run_report() {
        let outcome = RunOutcome {
            run_id: Uuid::now_v7(),
            stages: vec![
                StageReport::satisfied("cmake", "cmake matches /3\\.28/", Duration::ZERO),
                StageReport::succeeded("python", vec!["installed".to_string()], Duration::from_secs(2)),
            ],
            cancelled: false,
            duration: Duration::from_secs(2),
        };
        let report = RunReport::from_outcome(&outcome);

        assert_eq!(report.exit_code(), EXIT_SUCCESS);
        assert_eq!(report.stages[0].status, "satisfied");
        assert_eq!(report.stages[1].status, "succeeded");
        assert!(report.stages[1].output_tail.is_empty());
    }

    #[test]
    fn test_not_run_and_cancelled() {
        let outcome = RunOutcome {
            run_id: Uuid::now_v7(),
            stages: vec![
                StageReport::failed(
                    StageFailedError::new("python", StageFailureCause::Cancelled),
                    Duration::ZERO,
                ),
                StageReport::not_run("simpleitk"),
            ],
            cancelled: true,
            duration: Duration::ZERO,
        };
        let report = RunReport::from_outcome(&outcome);

        assert_eq!(report.stages[1].status, "not_run");
        assert_eq!(report.counts.not_run, 1);
        assert!(report.render_text().ends_with("(cancelled)\n"));
    }

    #[test]
    fn test_render_text() {
        let text = RunReport::from_outcome(&failed_outcome()).render_text();

        assert!(text.contains("  cmake      failed     'make' exited with status 2\n"));
        assert!(text.contains("      | make: *** [all] Error 2\n"));
        assert!(text.contains("  python     blocked    dependency 'cmake' failed\n"));
        assert!(text.contains("0 succeeded (0 already satisfied), 1 failed, 2 blocked, 0 not run"));
    }

    #[test]
    fn test_json_shape() {
        let report = RunReport::from_outcome(&failed_outcome());
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["counts"]["blocked"], 2);
        assert_eq!(json["stages"][0]["stageId"], "cmake");
        assert_eq!(json["stages"][0]["outputTail"][0], "make: *** [all] Error 2");
        assert!(json["stages"][1].get("outputTail").is_none());
    }
}
