//! A validated, immutable set of stage descriptors.

use super::plan::{resolve, ExecutionPlan};
use crate::errors::PlanError;
use crate::stages::StageDescriptor;
use std::collections::{HashMap, HashSet, VecDeque};

/// Descriptors that passed resolution, together with their global plan.
///
/// Built once from the descriptor file and shared read-only with the
/// engine; subsets are planned with [`StageSet::plan_for`].
#[derive(Debug, Clone)]
pub struct StageSet {
    descriptors: Vec<StageDescriptor>,
    index: HashMap<String, usize>,
    plan: ExecutionPlan,
}

impl StageSet {
    /// Validates and orders `descriptors`.
    ///
    /// # Errors
    ///
    /// Returns any resolver error; see [`resolve`].
    pub fn new(descriptors: Vec<StageDescriptor>) -> Result<Self, PlanError> {
        let plan = resolve(&descriptors)?;
        let index = descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();

        Ok(Self {
            descriptors,
            index,
            plan,
        })
    }

    /// Returns the descriptor for `stage_id`.
    #[must_use]
    pub fn get(&self, stage_id: &str) -> Option<&StageDescriptor> {
        self.index.get(stage_id).map(|&i| &self.descriptors[i])
    }

    /// Returns the descriptors in declaration order.
    #[must_use]
    pub fn descriptors(&self) -> &[StageDescriptor] {
        &self.descriptors
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Returns the plan covering every stage.
    #[must_use]
    pub fn plan_all(&self) -> ExecutionPlan {
        self.plan.clone()
    }

    /// Returns the plan restricted to `requested` and everything they
    /// transitively depend on, in global order.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::UnknownStage`] for an undeclared id.
    pub fn plan_for<S: AsRef<str>>(&self, requested: &[S]) -> Result<ExecutionPlan, PlanError> {
        let mut needed: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        for id in requested {
            let id = id.as_ref();
            let descriptor = self
                .get(id)
                .ok_or_else(|| PlanError::UnknownStage(id.to_string()))?;
            if needed.insert(descriptor.id.as_str()) {
                queue.push_back(descriptor.id.as_str());
            }
        }

        while let Some(id) = queue.pop_front() {
            if let Some(descriptor) = self.get(id) {
                for dep in &descriptor.depends_on {
                    if needed.insert(dep.as_str()) {
                        queue.push_back(dep.as_str());
                    }
                }
            }
        }

        Ok(ExecutionPlan::new(
            self.plan
                .iter()
                .filter(|id| needed.contains(id))
                .map(str::to_string)
                .collect(),
        ))
    }

    /// Returns every stage that transitively depends on `stage_id`, in
    /// global plan order.
    #[must_use]
    pub fn dependents(&self, stage_id: &str) -> Vec<String> {
        let mut affected: HashSet<&str> = HashSet::new();
        let mut queue = VecDeque::from([stage_id]);

        while let Some(current) = queue.pop_front() {
            for descriptor in &self.descriptors {
                if descriptor.depends_on.iter().any(|dep| dep == current)
                    && affected.insert(descriptor.id.as_str())
                {
                    queue.push_back(descriptor.id.as_str());
                }
            }
        }

        self.plan
            .iter()
            .filter(|id| affected.contains(id))
            .map(str::to_string)
            .collect()
    }
}
