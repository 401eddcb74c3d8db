//! # Buildflow
//!
//! Dependency-ordered, idempotent orchestration of build stages.
//!
//! A build chain is described as a set of stage descriptors, each with its
//! dependencies, the commands it runs and a check that decides whether the
//! stage is already satisfied. Buildflow provides:
//!
//! - **Deterministic planning**: topological ordering with cycle and missing
//!   dependency diagnostics
//! - **Bounded parallel execution**: independent stages run concurrently up to
//!   a worker limit, failures block only their dependents
//! - **Re-entrant runs**: a persisted ledger lets a rerun skip finished work
//! - **Cancellation**: in-flight commands get a grace period before they are
//!   killed
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use buildflow::prelude::*;
//!
//! let stages = StageSetBuilder::new()
//!     .stage("cmake", &[], [CommandSpec::shell("./bootstrap && make install")])?
//!     .stage("python", &["cmake"], [CommandSpec::new("make").with_arg("install")])?
//!     .build()?;
//!
//! let plan = stages.plan_for(&["python"])?;
//! let events: Arc<dyn EventSink> = Arc::new(LoggingEventSink::default());
//! let engine = ExecutionEngine::new(Arc::new(SystemProcessRunner::new(events.clone())), events);
//! let outcome = engine
//!     .execute(&stages, &plan, &RunContext::new("."), Arc::new(RunLedger::in_memory()), cancel)
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod observability;
pub mod pipeline;
pub mod process;
pub mod report;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::OrchestratorConfig;
    pub use crate::context::RunContext;
    pub use crate::core::StageStatus;
    pub use crate::errors::{
        BuildflowError, CommandError, ContractErrorInfo, CycleDetectedError,
        DescriptorLoadError, LedgerError, PipelineValidationError, PlanError,
        StageFailedError, StageFailureCause, UnknownDependencyError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::ledger::{LedgerEntry, RunLedger};
    pub use crate::pipeline::{
        resolve, ExecutionEngine, ExecutionPlan, RunOutcome, StageReport, StageSet,
        StageSetBuilder,
    };
    pub use crate::process::{ProcessRunner, SystemProcessRunner};
    pub use crate::report::RunReport;
    pub use crate::stages::{load_descriptors, CommandSpec, IdempotencyCheck, StageDescriptor};
    pub use std::sync::Arc;
}
