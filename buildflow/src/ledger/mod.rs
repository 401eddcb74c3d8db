//! Run ledger recording stage completion across invocations.
//!
//! The ledger is the only mutable state shared between concurrently running
//! stages. It is persisted as newline-delimited JSON and rewritten atomically
//! on every flush.

mod entry;
mod store;

pub use entry::LedgerEntry;
pub use store::RunLedger;

/// Detail recorded for entries a crashed run left in `Running`.
pub const INTERRUPTED_DETAIL: &str = "interrupted";
