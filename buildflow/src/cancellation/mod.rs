//! Structured cancellation for orchestrator runs.
//!
//! A single [`CancellationToken`] is shared by the front end (which trips it
//! on Ctrl-C), the engine (which stops scheduling) and the process runner
//! (which terminates in-flight commands after a grace period).

mod token;

pub use token::CancellationToken;
