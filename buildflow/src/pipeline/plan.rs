//! Execution plans and the dependency resolver.

use crate::errors::{
    ContractErrorInfo, CycleDetectedError, PipelineValidationError, PlanError,
    UnknownDependencyError,
};
use crate::stages::StageDescriptor;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Ordered stage ids; every stage appears after all of its dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    order: Vec<String>,
}

impl ExecutionPlan {
    pub(crate) fn new(order: Vec<String>) -> Self {
        Self { order }
    }

    /// Returns the stage ids in execution order.
    #[must_use]
    pub fn stage_ids(&self) -> &[String] {
        &self.order
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if the plan contains no stage.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns true if `stage_id` is part of the plan.
    #[must_use]
    pub fn contains(&self, stage_id: &str) -> bool {
        self.order.iter().any(|id| id == stage_id)
    }

    /// Returns the position of `stage_id` in the plan.
    #[must_use]
    pub fn position(&self, stage_id: &str) -> Option<usize> {
        self.order.iter().position(|id| id == stage_id)
    }

    /// Iterates over the stage ids in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

/// Orders `descriptors` so that each stage follows its dependencies.
///
/// Ties between independent stages are broken by declaration order, so the
/// same input always yields the same plan.
///
/// # Errors
///
/// Fails on an empty set, blank or duplicate ids, a dependency on an
/// undeclared id, or a cycle (a stage depending on itself is a cycle of
/// one).
pub fn resolve(descriptors: &[StageDescriptor]) -> Result<ExecutionPlan, PlanError> {
    if descriptors.is_empty() {
        return Err(PipelineValidationError::new("No stages declared")
            .with_error_info(
                ContractErrorInfo::new("PLAN-004-EMPTY", "Cannot plan an empty stage set")
                    .with_fix_hint("Declare at least one stage in the descriptor file."),
            )
            .into());
    }

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(descriptors.len());
    for (i, descriptor) in descriptors.iter().enumerate() {
        descriptor.validate()?;
        if index.insert(descriptor.id.as_str(), i).is_some() {
            return Err(duplicate(&descriptor.id).into());
        }
    }

    let mut deps: Vec<Vec<usize>> = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        if descriptor.depends_on_itself() {
            let id = descriptor.id.clone();
            return Err(CycleDetectedError::new(vec![id.clone(), id]).into());
        }
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for dep in &descriptor.depends_on {
            let Some(&d) = index.get(dep.as_str()) else {
                return Err(UnknownDependencyError::new(&descriptor.id, dep).into());
            };
            if seen.insert(d) {
                resolved.push(d);
            }
        }
        deps.push(resolved);
    }

    let mut in_degree: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); descriptors.len()];
    for (i, stage_deps) in deps.iter().enumerate() {
        for &d in stage_deps {
            dependents[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..descriptors.len())
        .filter(|&i| in_degree[i] == 0)
        .collect();
    let mut order = Vec::with_capacity(descriptors.len());

    while let Some(i) = ready.pop_first() {
        order.push(descriptors[i].id.clone());
        for &child in &dependents[i] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.insert(child);
            }
        }
    }

    if order.len() < descriptors.len() {
        let cycle = find_cycle(descriptors, &deps, &in_degree);
        return Err(CycleDetectedError::new(cycle).into());
    }

    Ok(ExecutionPlan::new(order))
}

pub(crate) fn duplicate(id: &str) -> PipelineValidationError {
    PipelineValidationError::new(format!("Stage '{id}' is declared more than once"))
        .with_stages(vec![id.to_string()])
        .with_error_info(
            ContractErrorInfo::new("PLAN-003-DUPLICATE", format!("Duplicate stage id '{id}'"))
                .with_fix_hint("Rename one of the stages or merge their commands."),
        )
}

/// Extracts one cycle among the stages Kahn's algorithm could not order.
///
/// The returned path repeats its first id at the end.
fn find_cycle(descriptors: &[StageDescriptor], deps: &[Vec<usize>], in_degree: &[usize]) -> Vec<String> {
    let stuck: Vec<usize> = (0..descriptors.len()).filter(|&i| in_degree[i] > 0).collect();
    let mut visited = HashSet::new();
    let mut on_path = HashSet::new();
    let mut path = Vec::new();

    for &start in &stuck {
        if !visited.contains(&start) {
            if let Some(cycle) = dfs_cycle(start, deps, &mut visited, &mut on_path, &mut path) {
                return cycle.into_iter().map(|i| descriptors[i].id.clone()).collect();
            }
        }
    }

    stuck.into_iter().map(|i| descriptors[i].id.clone()).collect()
}

fn dfs_cycle(
    node: usize,
    deps: &[Vec<usize>],
    visited: &mut HashSet<usize>,
    on_path: &mut HashSet<usize>,
    path: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    visited.insert(node);
    on_path.insert(node);
    path.push(node);

    for &dep in &deps[node] {
        if on_path.contains(&dep) {
            let start = path.iter().position(|&n| n == dep).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(dep);
            return Some(cycle);
        }
        if !visited.contains(&dep) {
            if let Some(cycle) = dfs_cycle(dep, deps, visited, on_path, path) {
                return Some(cycle);
            }
        }
    }

    path.pop();
    on_path.remove(&node);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stage(id: &str, deps: &[&str]) -> StageDescriptor {
        StageDescriptor::new(id).with_dependencies(deps.iter().copied())
    }

    fn ids(plan: &ExecutionPlan) -> Vec<&str> {
        plan.iter().collect()
    }

    #[test]
    fn test_linear_chain() {
        let plan = resolve(&[
            stage("simpleitk", &["cmake", "python"]),
            stage("python", &["cmake"]),
            stage("cmake", &[]),
        ])
        .unwrap();
        assert_eq!(ids(&plan), vec!["cmake", "python", "simpleitk"]);
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let descriptors = [
            stage("fetch-b", &[]),
            stage("fetch-a", &[]),
            stage("build", &["fetch-a", "fetch-b"]),
            stage("docs", &[]),
        ];
        let plan = resolve(&descriptors).unwrap();
        assert_eq!(ids(&plan), vec!["fetch-b", "fetch-a", "build", "docs"]);

        for _ in 0..10 {
            assert_eq!(resolve(&descriptors).unwrap(), plan);
        }
    }

    #[test]
    fn test_every_stage_after_its_dependencies() {
        let descriptors = [
            stage("e", &["d", "b"]),
            stage("d", &["c"]),
            stage("c", &["a"]),
            stage("b", &["a"]),
            stage("a", &[]),
        ];
        let plan = resolve(&descriptors).unwrap();
        for descriptor in &descriptors {
            let pos = plan.position(&descriptor.id).unwrap();
            for dep in &descriptor.depends_on {
                assert!(plan.position(dep).unwrap() < pos, "{dep} must precede {}", descriptor.id);
            }
        }
    }

    #[test]
    fn test_three_stage_cycle_names_all() {
        let err = resolve(&[stage("a", &["c"]), stage("b", &["a"]), stage("c", &["b"])]).unwrap_err();
        let PlanError::CycleDetected(cycle) = err else {
            panic!("expected a cycle, got {err:?}");
        };
        let mut named = cycle.stages();
        named.sort();
        assert_eq!(named, vec!["a", "b", "c"]);
        assert_eq!(cycle.cycle_path.first(), cycle.cycle_path.last());
    }

    #[test]
    fn test_self_dependency_is_cycle_of_one() {
        let err = resolve(&[stage("cmake", &["cmake"])]).unwrap_err();
        let PlanError::CycleDetected(cycle) = err else {
            panic!("expected a cycle, got {err:?}");
        };
        assert_eq!(cycle.cycle_path, vec!["cmake", "cmake"]);
    }

    #[test]
    fn test_cycle_excludes_acyclic_prefix() {
        let err = resolve(&[
            stage("base", &[]),
            stage("x", &["base", "y"]),
            stage("y", &["x"]),
            stage("tail", &["y"]),
        ])
        .unwrap_err();
        let PlanError::CycleDetected(cycle) = err else {
            panic!("expected a cycle, got {err:?}");
        };
        let mut named = cycle.stages();
        named.sort();
        assert_eq!(named, vec!["x", "y"]);
    }

    #[test]
    fn test_unknown_dependency() {
        let err = resolve(&[stage("python", &["cmak"])]).unwrap_err();
        let PlanError::UnknownDependency(missing) = err else {
            panic!("expected unknown dependency, got {err:?}");
        };
        assert_eq!(missing.stage, "python");
        assert_eq!(missing.missing, "cmak");
    }

    #[test]
    fn test_duplicate_and_empty() {
        let err = resolve(&[stage("cmake", &[]), stage("cmake", &[])]).unwrap_err();
        assert_eq!(err.error_info().map(|i| i.code.as_str()), Some("PLAN-003-DUPLICATE"));

        let err = resolve(&[]).unwrap_err();
        assert_eq!(err.error_info().map(|i| i.code.as_str()), Some("PLAN-004-EMPTY"));

        assert!(resolve(&[stage("  ", &[])]).is_err());
    }

    #[test]
    fn test_repeated_dependency_counted_once() {
        let mut python = stage("python", &[]);
        python.depends_on = vec!["cmake".to_string(), "cmake".to_string()];
        let plan = resolve(&[stage("cmake", &[]), python]).unwrap();
        assert_eq!(ids(&plan), vec!["cmake", "python"]);
    }
}
