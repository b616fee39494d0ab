//! # Health Sample
//!
//! Ephemeral, advisory classification of a live run. Never persisted.

use crate::state_machine::RunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthClassification {
    Healthy,
    Stuck,
    /// Not enough information to judge (no start time, unreadable log)
    Indeterminate,
    /// The run is not live
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub run_id: Uuid,
    pub status: RunState,
    pub classification: HealthClassification,
    pub healthy: bool,
    pub stuck: bool,
    pub reason: String,
    pub runtime_seconds: Option<u64>,
    pub seconds_since_log_update: Option<u64>,
    pub pid: Option<u32>,
    pub log_size_bytes: Option<u64>,
    pub sampled_at: DateTime<Utc>,
}

impl HealthSample {
    /// Neutral result for runs that are not starting or running
    pub fn not_applicable(run_id: Uuid, status: RunState) -> Self {
        Self {
            run_id,
            status,
            classification: HealthClassification::NotApplicable,
            healthy: false,
            stuck: false,
            reason: format!("run is {status}"),
            runtime_seconds: None,
            seconds_since_log_update: None,
            pid: None,
            log_size_bytes: None,
            sampled_at: Utc::now(),
        }
    }

    pub fn is_applicable(&self) -> bool {
        self.classification != HealthClassification::NotApplicable
    }
}
