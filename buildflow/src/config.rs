//! Orchestrator configuration.
//!
//! Settings are layered: built-in defaults, then `BUILDFLOW_*` environment
//! variables, then whatever the front end sets explicitly. The result is
//! turned into the immutable [`RunContext`] for one invocation.

use crate::context::{RunContext, DEFAULT_GRACE_PERIOD, DEFAULT_TAIL_LINES};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Prefix of the environment variables read by [`OrchestratorConfig::apply_env`].
pub const ENV_PREFIX: &str = "BUILDFLOW_";

/// Configuration for one orchestrator invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Descriptor file to load.
    #[serde(default = "default_stages_file")]
    pub stages_file: PathBuf,
    /// Where the run ledger is persisted.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    /// Directory relative command paths resolve against.
    #[serde(default = "default_target_dir")]
    pub target_dir: PathBuf,
    /// Maximum number of concurrently running stages.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Seconds in-flight commands may keep running after cancellation.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Output lines kept per stream.
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
    /// Run stages even if their checks are satisfied.
    #[serde(default)]
    pub force: bool,
    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json_logs: bool,
    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Environment overlay for every command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_stages_file() -> PathBuf {
    PathBuf::from("stages.json")
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from(".buildflow/ledger.ndjson")
}

fn default_target_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

fn default_grace_secs() -> u64 {
    DEFAULT_GRACE_PERIOD.as_secs()
}

fn default_tail_lines() -> usize {
    DEFAULT_TAIL_LINES
}

fn default_log_filter() -> String {
    crate::observability::DEFAULT_LOG_FILTER.to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stages_file: default_stages_file(),
            ledger_path: default_ledger_path(),
            target_dir: default_target_dir(),
            parallelism: default_parallelism(),
            grace_secs: default_grace_secs(),
            tail_lines: default_tail_lines(),
            force: false,
            json_logs: false,
            log_filter: default_log_filter(),
            env: BTreeMap::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from defaults and the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a `BUILDFLOW_*` variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env(std::env::vars())
    }

    /// Applies `BUILDFLOW_*` overrides from `vars`.
    ///
    /// Unrelated variables are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if a recognised variable cannot be parsed.
    pub fn apply_env<I, K, V>(mut self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key = key.as_ref();
            let value = value.into();
            match name {
                "STAGES_FILE" => self.stages_file = PathBuf::from(value),
                "LEDGER_PATH" => self.ledger_path = PathBuf::from(value),
                "TARGET_DIR" => self.target_dir = PathBuf::from(value),
                "PARALLELISM" => self.parallelism = parse_positive(key, &value)?,
                "GRACE_SECS" => self.grace_secs = parse(key, &value)?,
                "TAIL_LINES" => self.tail_lines = parse_positive(key, &value)?,
                "FORCE" => self.force = parse_bool(key, &value)?,
                "JSON_LOGS" => self.json_logs = parse_bool(key, &value)?,
                "LOG" => self.log_filter = value,
                _ => {}
            }
        }
        Ok(self)
    }

    /// Sets the descriptor file.
    #[must_use]
    pub fn with_stages_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stages_file = path.into();
        self
    }

    /// Sets the ledger path.
    #[must_use]
    pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = path.into();
        self
    }

    /// Sets the target directory.
    #[must_use]
    pub fn with_target_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.target_dir = dir.into();
        self
    }

    /// Sets the worker limit.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Sets the cancellation grace period in seconds.
    #[must_use]
    pub fn with_grace_secs(mut self, secs: u64) -> Self {
        self.grace_secs = secs;
        self
    }

    /// Forces satisfied stages to run.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Switches JSON logging on or off.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Adds an environment variable to the overlay.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Returns the grace period as a duration.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    /// Builds the run context for one invocation.
    #[must_use]
    pub fn to_run_context(&self) -> RunContext {
        RunContext::new(&self.target_dir)
            .with_parallelism(self.parallelism)
            .with_envs(self.env.clone())
            .with_force(self.force)
            .with_grace_period(self.grace_period())
            .with_tail_lines(self.tail_lines)
    }
}

/// Parses a `KEY=VALUE` pair as given on the command line.
///
/// # Errors
///
/// Returns an error if there is no `=` or the key is empty.
pub fn parse_env_pair(pair: &str) -> Result<(String, String), ConfigError> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(ConfigError::InvalidValue {
            key: "--env".to_string(),
            value: pair.to_string(),
        }),
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_positive(key: &str, value: &str) -> Result<usize, ConfigError> {
    match parse::<usize>(key, value)? {
        0 => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
        n => Ok(n),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.stages_file, PathBuf::from("stages.json"));
        assert!(config.parallelism >= 1);
        assert_eq!(config.grace_period(), DEFAULT_GRACE_PERIOD);
        assert!(!config.force);
    }

    #[test]
    fn test_env_overrides() {
        let config = OrchestratorConfig::default()
            .apply_env([
                ("BUILDFLOW_PARALLELISM", "3"),
                ("BUILDFLOW_LEDGER_PATH", "/var/lib/buildflow/ledger.ndjson"),
                ("BUILDFLOW_JSON_LOGS", "true"),
                ("BUILDFLOW_GRACE_SECS", "30"),
                ("HOME", "/root"),
            ])
            .unwrap();

        assert_eq!(config.parallelism, 3);
        assert_eq!(config.ledger_path, PathBuf::from("/var/lib/buildflow/ledger.ndjson"));
        assert!(config.json_logs);
        assert_eq!(config.grace_secs, 30);
    }

    #[test]
    fn test_invalid_env_value() {
        let err = OrchestratorConfig::default()
            .apply_env([("BUILDFLOW_PARALLELISM", "lots")])
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "BUILDFLOW_PARALLELISM".to_string(),
                value: "lots".to_string(),
            }
        );

        assert!(OrchestratorConfig::default()
            .apply_env([("BUILDFLOW_TAIL_LINES", "0")])
            .is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{"target_dir": "/opt/toolchain", "parallelism": 2}"#).unwrap();
        assert_eq!(config.parallelism, 2);
        assert_eq!(config.tail_lines, DEFAULT_TAIL_LINES);
    }

    #[test]
    fn test_to_run_context() {
        let ctx = OrchestratorConfig::default()
            .with_target_dir("/opt/toolchain")
            .with_parallelism(2)
            .with_grace_secs(5)
            .with_env("CC", "gcc-13")
            .with_force(true)
            .to_run_context();

        assert_eq!(ctx.target_dir(), Path::new("/opt/toolchain"));
        assert_eq!(ctx.parallelism(), 2);
        assert_eq!(ctx.grace_period(), Duration::from_secs(5));
        assert_eq!(ctx.env().get("CC").map(String::as_str), Some("gcc-13"));
        assert!(ctx.force());
    }

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("CMAKE_PREFIX_PATH=/opt/cmake").unwrap(),
            ("CMAKE_PREFIX_PATH".to_string(), "/opt/cmake".to_string())
        );
        assert_eq!(parse_env_pair("EMPTY=").unwrap().1, "");
        assert!(parse_env_pair("NOVALUE").is_err());
        assert!(parse_env_pair("=x").is_err());
    }
}
