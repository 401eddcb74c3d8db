//! Run context shared read-only by every component of an invocation.

mod run;

pub use run::{RunContext, DEFAULT_GRACE_PERIOD, DEFAULT_TAIL_LINES};
