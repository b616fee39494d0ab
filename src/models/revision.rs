//! # Revision Model
//!
//! A named configuration of an experiment. Runs freeze a revision into their
//! snapshot at creation; plugins derive new revisions between generations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// A stored revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub revision_id: Uuid,
    pub experiment_id: Uuid,
    pub name: String,
    pub description: String,
    pub parent_revision_id: Option<Uuid>,
    pub trainer_config: Value,
    pub cli_flags: BTreeMap<String, Value>,
    pub environment_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl Revision {
    /// Validate that a run may be created from this revision
    pub fn validate_for_run(&self) -> Result<(), String> {
        match &self.trainer_config {
            Value::Object(map) if !map.is_empty() => {}
            _ => return Err(format!("revision {} has no trainer configuration", self.name)),
        }
        if self.environment_path.is_none() {
            return Err(format!("revision {} has no environment", self.name));
        }
        Ok(())
    }

    /// Start a draft derived from this revision
    pub fn derive(&self, name: impl Into<String>) -> RevisionDraft {
        RevisionDraft {
            experiment_id: self.experiment_id,
            name: name.into(),
            description: String::new(),
            parent_revision_id: Some(self.revision_id),
            trainer_config: self.trainer_config.clone(),
            cli_flags: self.cli_flags.clone(),
            environment_path: self.environment_path.clone(),
        }
    }
}

/// Revision contents before the store assigns identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionDraft {
    pub experiment_id: Uuid,
    pub name: String,
    pub description: String,
    pub parent_revision_id: Option<Uuid>,
    pub trainer_config: Value,
    pub cli_flags: BTreeMap<String, Value>,
    pub environment_path: Option<PathBuf>,
}

impl RevisionDraft {
    pub fn new(experiment_id: Uuid, name: impl Into<String>, trainer_config: Value) -> Self {
        Self {
            experiment_id,
            name: name.into(),
            description: String::new(),
            parent_revision_id: None,
            trainer_config,
            cli_flags: BTreeMap::new(),
            environment_path: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_cli_flag(mut self, key: impl Into<String>, value: Value) -> Self {
        self.cli_flags.insert(key.into(), value);
        self
    }

    pub fn with_environment(mut self, path: impl Into<PathBuf>) -> Self {
        self.environment_path = Some(path.into());
        self
    }

    pub fn into_revision(self, revision_id: Uuid) -> Revision {
        Revision {
            revision_id,
            experiment_id: self.experiment_id,
            name: self.name,
            description: self.description,
            parent_revision_id: self.parent_revision_id,
            trainer_config: self.trainer_config,
            cli_flags: self.cli_flags,
            environment_path: self.environment_path,
            created_at: Utc::now(),
        }
    }
}
