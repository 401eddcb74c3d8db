//! Core domain model types for buildflow.

mod status;

pub use status::StageStatus;
