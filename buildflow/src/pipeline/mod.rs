//! Planning and executing stages.
//!
//! This module provides:
//! - The dependency resolver producing an [`ExecutionPlan`]
//! - [`StageSet`] and its builder
//! - The [`ExecutionEngine`] and the [`RunOutcome`] it reports

mod builder;
mod engine;
mod outcome;
mod plan;
mod stage_set;


pub use builder::StageSetBuilder;
pub use engine::ExecutionEngine;
pub use outcome::{RunOutcome, StageReport, StatusCounts};
pub use plan::{resolve, ExecutionPlan};
pub use stage_set::StageSet;
