//! Test doubles for exercising the engine without spawning processes.

mod mocks;

pub use mocks::{Invocation, Script, ScriptedRunner};
