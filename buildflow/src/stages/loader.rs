//! Loading stage descriptors from JSON documents.

use super::StageDescriptor;
use crate::errors::DescriptorLoadError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// On-disk descriptor document: `{"stages": [...]}`.
///
/// Unknown fields are ignored so older binaries can read newer files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageFile {
    /// Descriptors in declaration order.
    #[serde(default)]
    pub stages: Vec<StageDescriptor>,
}

/// Parses descriptors from a JSON string.
///
/// # Errors
///
/// Returns an error if the document is malformed or a check is invalid.
pub fn parse_descriptors(source: &str) -> Result<Vec<StageDescriptor>, DescriptorLoadError> {
    let file: StageFile = serde_json::from_str(source)
        .map_err(|source| DescriptorLoadError::Parse { path: None, source })?;
    validate_checks(&file.stages)?;
    Ok(file.stages)
}

/// Reads descriptors from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub async fn load_descriptors(path: &Path) -> Result<Vec<StageDescriptor>, DescriptorLoadError> {
    let source = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DescriptorLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let file: StageFile =
        serde_json::from_str(&source).map_err(|source| DescriptorLoadError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
    validate_checks(&file.stages)?;

    debug!(path = %path.display(), stages = file.stages.len(), "Loaded stage descriptors");
    Ok(file.stages)
}

fn validate_checks(stages: &[StageDescriptor]) -> Result<(), DescriptorLoadError> {
    stages
        .iter()
        .try_for_each(|stage| stage.idempotency_check.validate(&stage.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::IdempotencyCheck;

    const TOOLCHAIN: &str = r#"{
        "stages": [
            {"id": "cmake", "commands": [{"shell": "make install"}],
             "idempotencyCheck": {"kind": "binaryVersion", "program": "cmake", "args": ["--version"], "pattern": "3\\.28"}},
            {"id": "python", "dependsOn": ["cmake"], "commands": [{"program": "make", "args": ["altinstall"]}]},
            {"id": "simpleitk", "dependsOn": ["cmake", "python"]}
        ]
    }"#;

    #[test]
    fn test_parse_descriptors() {
        let stages = parse_descriptors(TOOLCHAIN).unwrap();
        assert_eq!(stages.len(), 3);
        assert_eq!(stages[2].depends_on, vec!["cmake", "python"]);
        assert!(matches!(
            stages[0].idempotency_check,
            IdempotencyCheck::BinaryVersion { .. }
        ));
        assert_eq!(stages[1].idempotency_check, IdempotencyCheck::Ledger);
    }

    #[test]
    fn test_parse_error() {
        let err = parse_descriptors(r#"{"stages": [{"dependsOn": []}]}"#).unwrap_err();
        assert!(matches!(err, DescriptorLoadError::Parse { .. }));
    }

    #[test]
    fn test_bad_pattern_rejected_at_load() {
        let err = parse_descriptors(
            r#"{"stages": [{"id": "x", "idempotencyCheck": {"kind": "binaryVersion", "program": "x", "pattern": "("}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DescriptorLoadError::Pattern { .. }));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stages.json");
        std::fs::write(&path, TOOLCHAIN).unwrap();

        let stages = load_descriptors(&path).await.unwrap();
        assert_eq!(stages[0].id, "cmake");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = load_descriptors(Path::new("/nonexistent/stages.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, DescriptorLoadError::Read { .. }));
    }
}
