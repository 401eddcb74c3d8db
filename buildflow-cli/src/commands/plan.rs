//! `orchestrate plan` command

use super::{load_stage_set, OutputFormat, Selection};
use anyhow::Result;
use buildflow::config::OrchestratorConfig;
use std::io::Write;

/// Prints the resolved execution order without running anything.
pub async fn plan(
    config: &OrchestratorConfig,
    selection: &Selection,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<i32> {
    let stages = load_stage_set(&config.stages_file).await?;
    let plan = selection.plan(&stages)?;

    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, plan.stage_ids())?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            for (i, id) in plan.iter().enumerate() {
                let deps = stages
                    .get(id)
                    .map(|d| d.depends_on.join(", "))
                    .unwrap_or_default();
                if deps.is_empty() {
                    writeln!(out, "{:>3}. {id}", i + 1)?;
                } else {
                    writeln!(out, "{:>3}. {id}  (after {deps})", i + 1)?;
                }
            }
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::demo_config;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_plan_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Vec::new();

        let code = plan(&demo_config(&dir), &Selection::default(), OutputFormat::Text, &mut out)
            .await
            .unwrap();

        assert_eq!(code, 0);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "  1. cmake\n  2. python  (after cmake)\n  3. simpleitk  (after cmake, python)\n"
        );
        assert!(!dir.path().join("ledger.ndjson").exists());
    }

    #[tokio::test]
    async fn test_plan_json_subset() {
        let dir = tempfile::tempdir().unwrap();
        let selection = Selection {
            stages: vec!["python".to_string()],
            all: false,
        };
        let mut out = Vec::new();

        plan(&demo_config(&dir), &selection, OutputFormat::Json, &mut out)
            .await
            .unwrap();

        let order: Vec<String> = serde_json::from_slice(&out).unwrap();
        assert_eq!(order, vec!["cmake", "python"]);
    }
}
