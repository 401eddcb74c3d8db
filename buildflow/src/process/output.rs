//! Captured command output.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Bounded buffer keeping the last lines written to a stream.
#[derive(Debug, Clone)]
pub struct OutputTail {
    capacity: usize,
    lines: VecDeque<String>,
}

impl OutputTail {
    /// Creates a buffer holding at most `capacity` lines.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends a line, evicting the oldest one when full.
    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    /// Consumes the buffer, returning the retained lines oldest first.
    #[must_use]
    pub fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

/// Result of a command that exited with status 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// The program that ran.
    pub program: String,
    /// Exit code reported by the OS.
    pub exit_code: i32,
    /// Last lines of stdout.
    pub stdout_tail: Vec<String>,
    /// Last lines of stderr.
    pub stderr_tail: Vec<String>,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl CommandOutcome {
    /// Creates a successful outcome with no output.
    #[must_use]
    pub fn success(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            exit_code: 0,
            stdout_tail: Vec::new(),
            stderr_tail: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Iterates over captured stdout then stderr lines.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout_tail
            .iter()
            .chain(self.stderr_tail.iter())
            .map(String::as_str)
    }
}

/// Merges two tails into one, keeping at most `limit` lines from the end.
#[must_use]
pub fn combined_tail(stdout: Vec<String>, stderr: Vec<String>, limit: usize) -> Vec<String> {
    let mut lines: Vec<String> = stdout.into_iter().chain(stderr).collect();
    if lines.len() > limit {
        lines.drain(..lines.len() - limit);
    }
    lines
}
