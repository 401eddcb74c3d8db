//! CLI command implementations

pub mod list;
pub mod plan;
pub mod run;
pub mod status;

use buildflow::errors::{
    BuildflowError, ConfigError, ContractSuggestions, DescriptorLoadError, PlanError,
};
use buildflow::pipeline::{ExecutionPlan, StageSet};
use buildflow::report::{EXIT_SETUP_FAILURE, EXIT_STAGE_FAILURE};
use buildflow::stages::load_descriptors;
use std::path::Path;

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// The stages a command applies to.
///
/// Without explicit ids every declared stage is selected.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub stages: Vec<String>,
    pub all: bool,
}

impl Selection {
    pub fn plan(&self, stages: &StageSet) -> Result<ExecutionPlan, PlanError> {
        if self.all || self.stages.is_empty() {
            Ok(stages.plan_all())
        } else {
            stages.plan_for(&self.stages)
        }
    }
}

/// Loads and resolves the descriptor file.
pub async fn load_stage_set(path: &Path) -> Result<StageSet, BuildflowError> {
    let descriptors = load_descriptors(path).await?;
    Ok(StageSet::new(descriptors)?)
}

/// Maps an error to the process exit code.
///
/// Descriptor, graph and configuration problems are setup failures; anything
/// else happened while stages were being handled.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    let setup = err
        .downcast_ref::<BuildflowError>()
        .is_some_and(BuildflowError::is_setup_error)
        || err.is::<PlanError>()
        || err.is::<DescriptorLoadError>()
        || err.is::<ConfigError>();

    if setup {
        EXIT_SETUP_FAILURE
    } else {
        EXIT_STAGE_FAILURE
    }
}

/// Returns a suggestion for fixing a plan error, if there is one.
pub fn hint_for(err: &anyhow::Error) -> Option<String> {
    let plan = match err.downcast_ref::<BuildflowError>() {
        Some(BuildflowError::Plan(plan)) => Some(plan),
        _ => err.downcast_ref::<PlanError>(),
    }?;
    let info = plan.error_info()?;
    info.fix_hint
        .clone()
        .or_else(|| ContractSuggestions::get(&info.code).map(str::to_string))
}


#[cfg(test)]
mod tests {
    use super::*;
    use buildflow::errors::LedgerError;

    #[test]
    fn test_exit_code_mapping() {
        let err = anyhow::Error::from(PlanError::UnknownStage("sitk".to_string()));
        assert_eq!(exit_code_for(&err), EXIT_SETUP_FAILURE);

        let err = anyhow::Error::from(BuildflowError::from(PlanError::UnknownStage(
            "sitk".to_string(),
        )));
        assert_eq!(exit_code_for(&err), EXIT_SETUP_FAILURE);

        let err = anyhow::Error::from(BuildflowError::from(LedgerError::Io {
            path: "ledger.ndjson".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        }));
        assert_eq!(exit_code_for(&err), EXIT_STAGE_FAILURE);
    }

    #[test]
    fn test_hint_for_plan_errors() {
        let err = anyhow::Error::from(BuildflowError::from(PlanError::from(
            buildflow::errors::UnknownDependencyError::new("python", "cmak"),
        )));
        assert!(hint_for(&err).unwrap().contains("typos"));

        let err = anyhow::Error::from(PlanError::UnknownStage("itk".to_string()));
        assert!(hint_for(&err).is_none());
    }

    #[tokio::test]
    async fn test_load_demo_descriptors() {
        let stages = load_stage_set(&test_support::demo_stages_file()).await.unwrap();
        assert_eq!(stages.plan_all().stage_ids(), ["cmake", "python", "simpleitk"]);
    }

    #[tokio::test]
    async fn test_selection() {
        let stages = load_stage_set(&test_support::demo_stages_file()).await.unwrap();

        let subset = Selection {
            stages: vec!["python".to_string()],
            all: false,
        };
        assert_eq!(subset.plan(&stages).unwrap().stage_ids(), ["cmake", "python"]);
        assert_eq!(Selection::default().plan(&stages).unwrap().len(), 3);
    }
}
