//! Event sink system for observability.
//!
//! The engine and the process runner report through an [`EventSink`]
//! instead of writing to the terminal directly.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run is about to schedule its plan.
pub const RUN_STARTED: &str = "run.started";
/// A run finished (successfully or not).
pub const RUN_FINISHED: &str = "run.finished";
/// A stage started executing its commands.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage was found already satisfied and skipped.
pub const STAGE_SATISFIED: &str = "stage.satisfied";
/// A stage ran all of its commands successfully.
pub const STAGE_SUCCEEDED: &str = "stage.succeeded";
/// A stage failed or was interrupted.
pub const STAGE_FAILED: &str = "stage.failed";
/// A stage was blocked by a failed dependency.
pub const STAGE_BLOCKED: &str = "stage.blocked";
/// A command was launched.
pub const COMMAND_STARTED: &str = "command.started";
/// One line of command output.
pub const COMMAND_OUTPUT: &str = "command.output";
/// A command exited.
pub const COMMAND_FINISHED: &str = "command.finished";
