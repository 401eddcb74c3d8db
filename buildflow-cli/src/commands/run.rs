//! `orchestrate run` command

use super::{load_stage_set, OutputFormat, Selection};
use anyhow::{Context, Result};
use buildflow::cancellation::CancellationToken;
use buildflow::config::OrchestratorConfig;
use buildflow::events::EventSink;
use buildflow::ledger::RunLedger;
use buildflow::pipeline::ExecutionEngine;
use buildflow::process::ProcessRunner;
use buildflow::report::RunReport;
use std::io::Write;
use std::sync::Arc;
use tracing::info;

/// Runs the selected stages and prints the summary.
///
/// Returns the exit code derived from the run outcome.
pub async fn run(
    config: &OrchestratorConfig,
    selection: &Selection,
    runner: Arc<dyn ProcessRunner>,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<i32> {
    let stages = load_stage_set(&config.stages_file).await?;
    let plan = selection.plan(&stages)?;
    let ledger = Arc::new(RunLedger::open(&config.ledger_path).await?);
    let ctx = config.to_run_context();

    info!(
        stages_file = %config.stages_file.display(),
        ledger = %config.ledger_path.display(),
        plan = ?plan.stage_ids(),
        "Starting run"
    );

    let engine = ExecutionEngine::new(runner, events);
    let outcome = engine.execute(&stages, &plan, &ctx, ledger, cancel).await?;
    let report = RunReport::from_outcome(&outcome);

    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &report).context("writing report")?;
            writeln!(out)?;
        }
        OutputFormat::Text => write!(out, "{}", report.render_text())?,
    }

    Ok(report.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::exit_code_for;
    use crate::commands::test_support::demo_config;
    use buildflow::core::StageStatus;
    use buildflow::events::NoOpEventSink;
    use buildflow::testing::{Script, ScriptedRunner};
    use pretty_assertions::assert_eq;

    async fn run_demo(
        config: &OrchestratorConfig,
        selection: &Selection,
        runner: Arc<ScriptedRunner>,
        format: OutputFormat,
    ) -> (Result<i32>, String) {
        let mut out = Vec::new();
        let result = run(
            config,
            selection,
            runner,
            Arc::new(NoOpEventSink),
            Arc::new(CancellationToken::new()),
            format,
            &mut out,
        )
        .await;
        (result, String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn test_toolchain_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let config = demo_config(&dir);
        let runner = Arc::new(ScriptedRunner::new());

        let (code, text) =
            run_demo(&config, &Selection::default(), runner.clone(), OutputFormat::Text).await;

        assert_eq!(code.unwrap(), 0);
        assert!(text.contains("cmake"));
        assert!(text.contains("0 failed, 0 blocked, 0 not run"));
        assert_eq!(runner.stages_invoked(), vec!["cmake", "python", "simpleitk"]);

        let ledger = RunLedger::open(&config.ledger_path).await.unwrap();
        assert_eq!(ledger.len(), 3);
        assert!(ledger
            .entries()
            .iter()
            .all(|entry| entry.status == StageStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_cmake_failure_blocks_chain() {
        let dir = tempfile::tempdir().unwrap();
        let config = demo_config(&dir);
        let runner = Arc::new(ScriptedRunner::new().with_stage_script(
            "cmake",
            Script::Fail {
                code: 2,
                stderr: vec!["make: *** [all] Error 2".to_string()],
            },
        ));

        let (code, json) =
            run_demo(&config, &Selection::default(), runner.clone(), OutputFormat::Json).await;
        assert_eq!(code.unwrap(), 1);

        let report: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(report["success"], false);
        assert_eq!(report["stages"][0]["stageId"], "cmake");
        assert_eq!(report["stages"][0]["status"], "failed");
        assert_eq!(report["stages"][0]["outputTail"][0], "make: *** [all] Error 2");
        assert_eq!(report["stages"][1]["status"], "blocked");
        assert_eq!(report["stages"][2]["status"], "blocked");
        assert_eq!(runner.calls_for_stage("python"), 0);
        assert_eq!(runner.calls_for_stage("simpleitk"), 0);

        let ledger = RunLedger::open(&config.ledger_path).await.unwrap();
        assert_eq!(ledger.get("python").unwrap().status, StageStatus::Blocked);
        assert_eq!(
            ledger.get("simpleitk").unwrap().error_detail.as_deref(),
            Some("dependency 'cmake' failed")
        );
    }

    #[tokio::test]
    async fn test_subset_runs_dependencies_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = demo_config(&dir);
        let runner = Arc::new(ScriptedRunner::new());
        let selection = Selection {
            stages: vec!["python".to_string()],
            all: false,
        };

        let (code, text) = run_demo(&config, &selection, runner.clone(), OutputFormat::Text).await;

        assert_eq!(code.unwrap(), 0);
        assert!(!text.contains("simpleitk"));
        assert_eq!(runner.stages_invoked(), vec!["cmake", "python"]);
    }

    #[tokio::test]
    async fn test_unknown_stage_is_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = demo_config(&dir);
        let selection = Selection {
            stages: vec!["itk".to_string()],
            all: false,
        };

        let (result, text) = run_demo(
            &config,
            &selection,
            Arc::new(ScriptedRunner::new()),
            OutputFormat::Text,
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(exit_code_for(&err), 2);
        assert!(err.to_string().contains("itk"));
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_missing_descriptor_file_is_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = demo_config(&dir).with_stages_file(dir.path().join("missing.json"));

        let (result, _) = run_demo(
            &config,
            &Selection::default(),
            Arc::new(ScriptedRunner::new()),
            OutputFormat::Text,
        )
        .await;

        assert_eq!(exit_code_for(&result.unwrap_err()), 2);
    }

    #[tokio::test]
    async fn test_cyclic_descriptors_are_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stages.json");
        std::fs::write(
            &path,
            r#"{"stages": [
                {"id": "a", "dependsOn": ["c"]},
                {"id": "b", "dependsOn": ["a"]},
                {"id": "c", "dependsOn": ["b"]}
            ]}"#,
        )
        .unwrap();
        let config = demo_config(&dir).with_stages_file(path);

        let (result, _) = run_demo(
            &config,
            &Selection::default(),
            Arc::new(ScriptedRunner::new()),
            OutputFormat::Text,
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(exit_code_for(&err), 2);
        assert!(err.to_string().contains("Cycle detected"));
    }
}
