//! `orchestrate status` command

use super::OutputFormat;
use anyhow::Result;
use buildflow::config::OrchestratorConfig;
use buildflow::ledger::RunLedger;
use chrono::SecondsFormat;
use std::io::Write;

/// Prints what the ledger recorded for each stage.
pub async fn status(
    config: &OrchestratorConfig,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<i32> {
    let ledger = RunLedger::open(&config.ledger_path).await?;
    let entries = ledger.entries();

    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &entries)?;
            writeln!(out)?;
        }
        OutputFormat::Text if entries.is_empty() => {
            writeln!(out, "No stages recorded in {}", config.ledger_path.display())?;
        }
        OutputFormat::Text => {
            let width = entries.iter().map(|e| e.stage_id.len()).max().unwrap_or(0);
            for entry in &entries {
                write!(
                    out,
                    "{:<width$}  {:<9}  {}",
                    entry.stage_id,
                    entry.status.to_string(),
                    entry.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
                )?;
                if let Some(detail) = &entry.error_detail {
                    write!(out, "  {detail}")?;
                }
                writeln!(out)?;
            }
        }
    }
    Ok(0)
}
