//! `orchestrate list` command

use super::{load_stage_set, OutputFormat};
use anyhow::Result;
use buildflow::config::OrchestratorConfig;
use buildflow::stages::IdempotencyCheck;
use std::io::Write;

fn describe_check(check: &IdempotencyCheck) -> String {
    match check {
        IdempotencyCheck::Ledger => "ledger".to_string(),
        IdempotencyCheck::Never => "never".to_string(),
        IdempotencyCheck::PathExists { path } => format!("path {}", path.display()),
        IdempotencyCheck::CommandSucceeds { command } => format!("probe `{command}`"),
        IdempotencyCheck::BinaryVersion {
            program, pattern, ..
        } => format!("{program} /{pattern}/"),
    }
}

/// Lists the declared stages in declaration order.
pub async fn list(
    config: &OrchestratorConfig,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<i32> {
    let stages = load_stage_set(&config.stages_file).await?;

    if format == OutputFormat::Json {
        serde_json::to_writer_pretty(&mut *out, stages.descriptors())?;
        writeln!(out)?;
        return Ok(0);
    }

    for stage in stages.descriptors() {
        writeln!(out, "{}", stage.id)?;
        if let Some(description) = &stage.description {
            writeln!(out, "    {description}")?;
        }
        if !stage.depends_on.is_empty() {
            writeln!(out, "    depends on: {}", stage.depends_on.join(", "))?;
        }
        writeln!(out, "    commands:   {}", stage.commands.len())?;
        writeln!(out, "    check:      {}", describe_check(&stage.idempotency_check))?;
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::demo_config;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_list_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Vec::new();

        list(&demo_config(&dir), OutputFormat::Text, &mut out)
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("cmake\n    CMake 3.28.3 built from source\n"));
        assert!(text.contains("    depends on: cmake, python\n"));
        assert!(text.contains("    check:      python3.11 /Python 3\\.11\\.9/\n"));
    }

    #[tokio::test]
    async fn test_list_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Vec::new();

        list(&demo_config(&dir), OutputFormat::Json, &mut out)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(json.as_array().map(Vec::len), Some(3));
        assert_eq!(json[2]["dependsOn"][1], "python");
        assert_eq!(json[0]["idempotencyCheck"]["kind"], "binaryVersion");
    }

    #[test]
    fn test_describe_check() {
        assert_eq!(describe_check(&IdempotencyCheck::Ledger), "ledger");
        assert_eq!(
            describe_check(&IdempotencyCheck::binary_version("cmake", r"3\.28")),
            r"cmake /3\.28/"
        );
    }
}
