//! Stage set builder with validation.

use super::plan::duplicate;
use super::StageSet;
use crate::errors::PlanError;
use crate::stages::{CommandSpec, IdempotencyCheck, StageDescriptor};

/// Builder for assembling stage sets in code.
///
/// Each stage is checked as it is added; dependency and cycle checks run in
/// [`StageSetBuilder::build`] so stages may be declared in any order.
#[derive(Debug, Clone, Default)]
pub struct StageSetBuilder {
    stages: Vec<StageDescriptor>,
}

impl StageSetBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stage running `commands` after `dependencies`.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is blank or already declared.
    pub fn stage(
        self,
        id: impl Into<String>,
        dependencies: &[&str],
        commands: impl IntoIterator<Item = CommandSpec>,
    ) -> Result<Self, PlanError> {
        let mut descriptor =
            StageDescriptor::new(id).with_dependencies(dependencies.iter().copied());
        descriptor.commands.extend(commands);
        self.add(descriptor)
    }

    /// Adds a stage with an idempotency check.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is blank or already declared.
    pub fn checked_stage(
        self,
        id: impl Into<String>,
        dependencies: &[&str],
        check: IdempotencyCheck,
        commands: impl IntoIterator<Item = CommandSpec>,
    ) -> Result<Self, PlanError> {
        let mut descriptor = StageDescriptor::new(id)
            .with_dependencies(dependencies.iter().copied())
            .with_check(check);
        descriptor.commands.extend(commands);
        self.add(descriptor)
    }

    /// Adds a fully built descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is blank or already declared.
    pub fn add(mut self, descriptor: StageDescriptor) -> Result<Self, PlanError> {
        descriptor.validate()?;

        if self.stages.iter().any(|s| s.id == descriptor.id) {
            return Err(duplicate(&descriptor.id).into());
        }

        self.stages.push(descriptor);
        Ok(self)
    }

    /// Returns the number of stages added so far.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Resolves the stages into a [`StageSet`].
    ///
    /// # Errors
    ///
    /// Returns an error for an empty builder, an unknown dependency or a
    /// cycle.
    pub fn build(self) -> Result<StageSet, PlanError> {
        StageSet::new(self.stages)
    }
}
