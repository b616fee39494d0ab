//! # Run Model
//!
//! The unit of orchestration. A run is created once with a frozen
//! [`RunSnapshot`] and may go through many execution attempts. Only the
//! state machine mutates the bookkeeping fields; the snapshot and the on-disk
//! paths are fixed at construction and exposed read-only.

use crate::constants::invocation::NUM_ENVS_FLAG;
use crate::state_machine::RunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Frozen configuration needed to reproduce the process invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Trainer executable (absolute path or a name resolved through `PATH`)
    pub trainer_program: String,
    /// Trainer configuration document, written to `config.yaml`
    pub trainer_config: Value,
    /// Trainer CLI flags (`time_scale`, `num_envs`, `seed`, ...)
    pub cli_flags: BTreeMap<String, Value>,
    /// Environment executable handed to the trainer with `--env`
    pub environment_path: Option<PathBuf>,
    /// Extra environment variables for the spawned process
    #[serde(default)]
    pub extra_env: BTreeMap<String, String>,
}

impl RunSnapshot {
    /// Number of environments, which sizes the port reservation
    pub fn num_envs(&self) -> u16 {
        self.cli_flags
            .get(NUM_ENVS_FLAG)
            .and_then(|value| match value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .map(|n| n.clamp(1, u64::from(u16::MAX)) as u16)
            .unwrap_or(1)
    }

    /// Validate that the snapshot can describe an invocation
    pub fn validate(&self) -> Result<(), String> {
        if self.trainer_program.trim().is_empty() {
            return Err("trainer program is empty".to_string());
        }
        match &self.trainer_config {
            Value::Object(map) if !map.is_empty() => Ok(()),
            Value::Object(_) => Err("trainer configuration is empty".to_string()),
            other => Err(format!(
                "trainer configuration must be a mapping, got {}",
                json_kind(other)
            )),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

/// Restart mode requested by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartMode {
    /// Continue from the most recent checkpoint
    Resume,
    /// Discard prior checkpoints and start clean
    Force,
}

impl fmt::Display for RestartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resume => write!(f, "resume"),
            Self::Force => write!(f, "force"),
        }
    }
}

impl std::str::FromStr for RestartMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resume" => Ok(Self::Resume),
            "force" => Ok(Self::Force),
            _ => Err(format!("Invalid restart mode: {s}")),
        }
    }
}

/// How a single attempt is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// First attempt of a created run
    Fresh,
    Resume,
    Force,
}

impl From<RestartMode> for LaunchMode {
    fn from(mode: RestartMode) -> Self {
        match mode {
            RestartMode::Resume => Self::Resume,
            RestartMode::Force => Self::Force,
        }
    }
}

/// On-disk locations owned by a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPaths {
    pub run_dir: PathBuf,
    pub config_path: PathBuf,
    pub log_path: PathBuf,
    pub artifacts_dir: PathBuf,
}

/// A run and its mutable bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: Uuid,
    pub experiment_id: Uuid,
    pub revision_id: Uuid,
    pub parent_run_id: Option<Uuid>,
    pub description: String,

    snapshot: RunSnapshot,
    enabled_plugins: Vec<String>,
    paths: RunPaths,

    pub status: RunState,
    /// Incremented once per spawn attempt
    pub execution_count: u32,
    pub created_at: DateTime<Utc>,
    /// Start of the current (or last) attempt
    pub started_at: Option<DateTime<Utc>>,
    /// End of the last attempt; `None` while an attempt is in flight
    pub ended_at: Option<DateTime<Utc>>,
    pub last_restarted_at: Option<DateTime<Utc>>,
    pub last_restart_mode: Option<RestartMode>,
    pub process_id: Option<u32>,
    pub command: Option<String>,
    pub exit_code: Option<i32>,
    pub failure_reason: Option<String>,
}

impl Run {
    /// Create a run in the `created` state
    pub fn new(
        run_id: Uuid,
        experiment_id: Uuid,
        revision_id: Uuid,
        snapshot: RunSnapshot,
        paths: RunPaths,
    ) -> Self {
        Self {
            run_id,
            experiment_id,
            revision_id,
            parent_run_id: None,
            description: String::new(),
            snapshot,
            enabled_plugins: Vec::new(),
            paths,
            status: RunState::Created,
            execution_count: 0,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            last_restarted_at: None,
            last_restart_mode: None,
            process_id: None,
            command: None,
            exit_code: None,
            failure_reason: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parent_run(mut self, parent_run_id: Option<Uuid>) -> Self {
        self.parent_run_id = parent_run_id;
        self
    }

    pub fn with_enabled_plugins(mut self, plugins: Vec<String>) -> Self {
        self.enabled_plugins = plugins;
        self
    }

    pub fn snapshot(&self) -> &RunSnapshot {
        &self.snapshot
    }

    pub fn enabled_plugins(&self) -> &[String] {
        &self.enabled_plugins
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    pub fn run_dir(&self) -> &Path {
        &self.paths.run_dir
    }

    pub fn log_path(&self) -> &Path {
        &self.paths.log_path
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.paths.artifacts_dir
    }

    /// Attempt number of the current (or last) execution
    pub fn current_attempt(&self) -> u32 {
        self.execution_count
    }

    /// Runtime of the current attempt in whole seconds
    pub fn runtime_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        let started = self.started_at?;
        let end = self.ended_at.unwrap_or(now);
        Some((end - started).num_seconds().max(0) as u64)
    }
}

/// Caller-facing status view of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusReport {
    pub run_id: Uuid,
    pub status: RunState,
    pub execution_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_restarted_at: Option<DateTime<Utc>>,
    pub process_id: Option<u32>,
    pub exit_code: Option<i32>,
    pub failure_reason: Option<String>,
}

impl From<&Run> for RunStatusReport {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.run_id,
            status: run.status,
            execution_count: run.execution_count,
            created_at: run.created_at,
            started_at: run.started_at,
            ended_at: run.ended_at,
            last_restarted_at: run.last_restarted_at,
            process_id: run.process_id,
            exit_code: run.exit_code,
            failure_reason: run.failure_reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(flags: Value) -> RunSnapshot {
        RunSnapshot {
            trainer_program: "mlagents-learn".to_string(),
            trainer_config: json!({"behaviors": {"Agent": {"trainer_type": "ppo"}}}),
            cli_flags: serde_json::from_value(flags).unwrap(),
            environment_path: None,
            extra_env: BTreeMap::new(),
        }
    }

    #[test]
    fn test_num_envs_parsing() {
        assert_eq!(snapshot(json!({})).num_envs(), 1);
        assert_eq!(snapshot(json!({"num_envs": 4})).num_envs(), 4);
        assert_eq!(snapshot(json!({"num_envs": "3"})).num_envs(), 3);
        assert_eq!(snapshot(json!({"num_envs": 0})).num_envs(), 1);
    }

    #[test]
    fn test_snapshot_validation() {
        assert!(snapshot(json!({})).validate().is_ok());

        let mut empty_program = snapshot(json!({}));
        empty_program.trainer_program = "  ".to_string();
        assert!(empty_program.validate().is_err());

        let mut scalar_config = snapshot(json!({}));
        scalar_config.trainer_config = json!("nope");
        assert!(scalar_config.validate().unwrap_err().contains("string"));
    }

    #[test]
    fn test_restart_mode_maps_to_launch_mode() {
        assert_eq!(LaunchMode::from(RestartMode::Resume), LaunchMode::Resume);
        assert_eq!(LaunchMode::from(RestartMode::Force), LaunchMode::Force);
        assert_eq!("force".parse::<RestartMode>().unwrap(), RestartMode::Force);
    }
}
