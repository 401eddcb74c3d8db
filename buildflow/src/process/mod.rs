//! Process execution layer.
//!
//! Every stage command and every probe run by an idempotency check goes
//! through a [`ProcessRunner`]. The system runner uses
//! `tokio::process::Command`, keeps a bounded tail of each output stream and
//! streams every line to the event sink.

mod output;
mod runner;

pub use output::{combined_tail, CommandOutcome, OutputTail};
pub use runner::{CommandRequest, ProcessRunner, SystemProcessRunner};
