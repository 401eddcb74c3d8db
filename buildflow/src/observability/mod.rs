//! Observability utilities.
//!
//! The library only emits `tracing` events; binaries call [`init_tracing`]
//! once to decide where they go.

mod logging;

pub use logging::{init_tracing, SpanTimer, DEFAULT_LOG_FILTER};
