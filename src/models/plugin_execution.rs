//! # Plugin Execution Model
//!
//! One invocation of an automation routine against a target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// What kind of entity a plugin is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginScope {
    Experiment,
    Run,
    Revision,
}

impl fmt::Display for PluginScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Experiment => write!(f, "experiment"),
            Self::Run => write!(f, "run"),
            Self::Revision => write!(f, "revision"),
        }
    }
}

impl std::str::FromStr for PluginScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "experiment" => Ok(Self::Experiment),
            "run" => Ok(Self::Run),
            "revision" => Ok(Self::Revision),
            _ => Err(format!("Invalid plugin scope: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl PluginExecutionStatus {
    /// Pending and running executions occupy their target
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn is_finished(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for PluginExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginExecution {
    pub execution_id: Uuid,
    pub plugin_name: String,
    pub scope: PluginScope,
    pub target_id: Uuid,
    pub settings: Value,
    pub status: PluginExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Generation counter advanced by population-based routines
    pub generation: u32,
    pub stop_requested: bool,
    /// Runs created by the routine through its API
    pub created_runs: Vec<Uuid>,
}

impl PluginExecution {
    pub fn new(plugin_name: impl Into<String>, scope: PluginScope, target_id: Uuid, settings: Value) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            plugin_name: plugin_name.into(),
            scope,
            target_id,
            settings,
            status: PluginExecutionStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            generation: 0,
            stop_requested: false,
            created_runs: Vec::new(),
        }
    }

    pub fn targets(&self, scope: PluginScope, target_id: Uuid) -> bool {
        self.scope == scope && self.target_id == target_id
    }
}
