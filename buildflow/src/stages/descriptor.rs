//! Stage and command descriptors.

use super::IdempotencyCheck;
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// One external command of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "CommandRepr")]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Working directory; relative paths resolve against the target directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Environment variables layered over the run overlay.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Kill the command after this many seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl CommandSpec {
    /// Creates a command running `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            timeout_secs: None,
        }
    }

    /// Creates a command running `script` through `sh -c`.
    #[must_use]
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").with_args(["-c".to_string(), script.into()])
    }

    /// Appends an argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Accepted on-disk shapes of a command: an explicit program or a shell line.
#[derive(Deserialize)]
#[serde(untagged)]
enum CommandRepr {
    #[serde(rename_all = "camelCase")]
    Shell {
        shell: String,
        #[serde(default)]
        working_dir: Option<PathBuf>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Exec {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        working_dir: Option<PathBuf>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

impl From<CommandRepr> for CommandSpec {
    fn from(repr: CommandRepr) -> Self {
        match repr {
            CommandRepr::Shell {
                shell,
                working_dir,
                env,
                timeout_secs,
            } => Self {
                working_dir,
                env,
                timeout_secs,
                ..Self::shell(shell)
            },
            CommandRepr::Exec {
                program,
                args,
                working_dir,
                env,
                timeout_secs,
            } => Self {
                program,
                args,
                working_dir,
                env,
                timeout_secs,
            },
        }
    }
}

/// Immutable definition of one build stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDescriptor {
    /// Unique stage id.
    pub id: String,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ids of stages that must succeed first, in declaration order.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Commands run in sequence.
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
    /// How to tell the stage is already satisfied.
    #[serde(default)]
    pub idempotency_check: IdempotencyCheck,
}

impl StageDescriptor {
    /// Creates a descriptor with no dependencies and no commands.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            depends_on: Vec::new(),
            commands: Vec::new(),
            idempotency_check: IdempotencyCheck::default(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        let dep = dep.into();
        if !self.depends_on.contains(&dep) {
            self.depends_on.push(dep);
        }
        self
    }

    /// Adds dependencies.
    #[must_use]
    pub fn with_dependencies(self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        deps.into_iter().fold(self, Self::with_dependency)
    }

    /// Appends a command.
    #[must_use]
    pub fn with_command(mut self, command: CommandSpec) -> Self {
        self.commands.push(command);
        self
    }

    /// Sets the idempotency check.
    #[must_use]
    pub fn with_check(mut self, check: IdempotencyCheck) -> Self {
        self.idempotency_check = check;
        self
    }

    /// Validates the descriptor in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is blank. Self-dependencies are reported
    /// by the resolver as a cycle of one.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.id.trim().is_empty() {
            return Err(PipelineValidationError::new("Stage id cannot be empty")
                .with_error_info(ContractErrorInfo::new(
                    "PLAN-005-EMPTY_ID",
                    "Every stage needs a non-empty id",
                )));
        }
        Ok(())
    }

    /// Returns true if the stage lists itself as a dependency.
    #[must_use]
    pub fn depends_on_itself(&self) -> bool {
        self.depends_on.iter().any(|dep| dep == &self.id)
    }

    /// Returns a stable hash of what the stage executes.
    ///
    /// Stored alongside ledger entries so an edited stage is not skipped
    /// because an older version of it once succeeded.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for command in &self.commands {
            let encoded = serde_json::to_vec(command).unwrap_or_default();
            hasher.update(&encoded);
            hasher.update(b"\n");
        }
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_descriptor_builder() {
        let stage = StageDescriptor::new("simpleitk")
            .describe("SimpleITK against the pinned toolchain")
            .with_dependencies(["cmake", "python", "cmake"])
            .with_command(CommandSpec::shell("make -j4"));

        assert_eq!(stage.depends_on, vec!["cmake", "python"]);
        assert_eq!(stage.commands.len(), 1);
        assert_eq!(stage.idempotency_check, IdempotencyCheck::Ledger);
    }

    #[test]
    fn test_blank_id_rejected() {
        assert!(StageDescriptor::new("  ").validate().is_err());
        assert!(StageDescriptor::new("cmake").validate().is_ok());
    }

    #[test]
    fn test_self_dependency_detected() {
        let stage = StageDescriptor::new("cmake").with_dependency("cmake");
        assert!(stage.depends_on_itself());
    }

    #[test]
    fn test_shell_command() {
        let command = CommandSpec::shell("tar xzf cmake.tar.gz");
        assert_eq!(command.program, "sh");
        assert_eq!(command.args, vec!["-c", "tar xzf cmake.tar.gz"]);
        assert_eq!(command.to_string(), "sh -c 'tar xzf cmake.tar.gz'");
    }

    #[test]
    fn test_command_deserialize_shapes() {
        let exec: CommandSpec = serde_json::from_str(
            r#"{"program": "wget", "args": ["-q", "https://example.org/a.tgz"], "timeoutSecs": 60}"#,
        )
        .unwrap();
        assert_eq!(exec.program, "wget");
        assert_eq!(exec.timeout_secs, Some(60));

        let shell: CommandSpec = serde_json::from_str(
            r#"{"shell": "./configure && make", "workingDir": "Python-3.11.9", "env": {"CC": "gcc"}}"#,
        )
        .unwrap();
        assert_eq!(shell.program, "sh");
        assert_eq!(shell.args[1], "./configure && make");
        assert_eq!(shell.working_dir, Some(PathBuf::from("Python-3.11.9")));
        assert_eq!(shell.env.get("CC"), Some(&"gcc".to_string()));
    }

    #[test]
    fn test_descriptor_ignores_unknown_fields() {
        let stage: StageDescriptor = serde_json::from_str(
            r#"{"id": "cmake", "owner": "infra", "commands": [{"shell": "true"}]}"#,
        )
        .unwrap();
        assert_eq!(stage.id, "cmake");
        assert!(stage.depends_on.is_empty());
    }

    #[test]
    fn test_fingerprint_tracks_commands() {
        let a = StageDescriptor::new("cmake").with_command(CommandSpec::shell("make"));
        let b = StageDescriptor::new("cmake").with_command(CommandSpec::shell("make"));
        let c = StageDescriptor::new("cmake").with_command(CommandSpec::shell("make install"));

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 32);
    }
}
