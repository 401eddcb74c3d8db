//! Ledger records.

use crate::core::StageStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// The recorded state of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// The stage this entry belongs to.
    pub stage_id: String,
    /// Last recorded status.
    pub status: StageStatus,
    /// When the status was recorded.
    pub timestamp: DateTime<Utc>,
    /// Failure or block reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Fingerprint of the descriptor that produced this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// How long the stage took.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// The invocation that wrote the entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
}

impl LedgerEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(stage_id: impl Into<String>, status: StageStatus) -> Self {
        Self {
            stage_id: stage_id.into(),
            status,
            timestamp: Utc::now(),
            error_detail: None,
            fingerprint: None,
            duration_ms: None,
            run_id: None,
        }
    }

    /// Attaches an error detail.
    #[must_use]
    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    /// Attaches the descriptor fingerprint.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Records the stage duration.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Records the invocation id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_entry_serializes_camel_case() {
        let entry = LedgerEntry::new("cmake", StageStatus::Failed)
            .with_error("'make' exited with status 2")
            .with_duration(Duration::from_millis(1500));

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["stageId"], "cmake");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["errorDetail"], "'make' exited with status 2");
        assert_eq!(json["durationMs"], 1500);
        assert!(json.get("fingerprint").is_none());
    }

    #[test]
    fn test_entry_ignores_unknown_fields() {
        let entry: LedgerEntry = serde_json::from_str(
            r#"{"stageId":"python","status":"succeeded","timestamp":"2026-03-01T10:00:00Z","host":"builder-1"}"#,
        )
        .unwrap();
        assert_eq!(entry.stage_id, "python");
        assert_eq!(entry.status, StageStatus::Succeeded);
        assert!(entry.error_detail.is_none());
    }
}
