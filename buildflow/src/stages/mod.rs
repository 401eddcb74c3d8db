//! Stage descriptors, idempotency checks and descriptor loading.
//!
//! Stages are the fundamental units of work: an id, the stages that must
//! succeed first, a command sequence and a check telling whether the work is
//! already done.

mod check;
mod descriptor;
mod loader;

pub use check::{CheckOutcome, IdempotencyCheck};
pub use descriptor::{CommandSpec, StageDescriptor};
pub use loader::{load_descriptors, parse_descriptors, StageFile};
