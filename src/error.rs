//! # Orchestration Errors
//!
//! The caller-facing error taxonomy. Component errors (state machine,
//! supervisor, repository, configuration, plugins) convert into
//! [`OrchestrationError`] at the orchestrator boundary.

use crate::config::ConfigurationError;
use crate::models::PluginScope;
use crate::plugins::PluginError;
use crate::repository::RepositoryError;
use crate::state_machine::{RunState, StateMachineError};
use crate::supervisor::SupervisorError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("Cannot {attempted} run {run_id}: run is {from}")]
    InvalidTransition {
        run_id: Uuid,
        from: RunState,
        attempted: String,
    },

    #[error("Failed to launch run {run_id}: {reason}")]
    SpawnError { run_id: Uuid, reason: String },

    #[error("Supervision lost for run {run_id}: {reason}")]
    SupervisionLost { run_id: Uuid, reason: String },

    #[error("Plugin execution {execution_id} failed: {message}")]
    PluginRoutineError { execution_id: Uuid, message: String },

    #[error("Run {0} not found")]
    RunNotFound(Uuid),

    #[error("Revision {0} not found")]
    RevisionNotFound(Uuid),

    #[error("Experiment {0} has no revisions")]
    NoRevisions(Uuid),

    #[error("Plugin '{0}' is not registered")]
    PluginNotFound(String),

    #[error("Plugin '{plugin}' does not support {scope} scope")]
    PluginScopeMismatch { plugin: String, scope: PluginScope },

    #[error("Plugin execution {execution_id} is already running for {scope} {target_id}")]
    PluginAlreadyRunning {
        scope: PluginScope,
        target_id: Uuid,
        execution_id: Uuid,
    },

    #[error("Plugin execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Guard condition failed for run {run_id}: {reason}")]
    GuardFailed { run_id: Uuid, reason: String },

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestrationError {
    /// Map a supervisor error raised while acting on `run_id`
    pub fn from_supervisor(run_id: Uuid, error: SupervisorError) -> Self {
        match error {
            SupervisorError::StateMachine(e) => e.into(),
            lost @ (SupervisorError::Unresponsive { .. } | SupervisorError::SignalFailed { .. }) => {
                Self::SupervisionLost {
                    run_id,
                    reason: lost.to_string(),
                }
            }
            SupervisorError::NotRunning(_) => {
                Self::InvalidRequest(format!("run {run_id} has no live process"))
            }
            other => Self::SpawnError {
                run_id,
                reason: other.to_string(),
            },
        }
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RunNotFound(_)
                | Self::RevisionNotFound(_)
                | Self::NoRevisions(_)
                | Self::PluginNotFound(_)
                | Self::ExecutionNotFound(_)
        ) || matches!(self, Self::Repository(RepositoryError::NotFound { .. }))
    }
}

impl From<StateMachineError> for OrchestrationError {
    fn from(error: StateMachineError) -> Self {
        match error {
            StateMachineError::InvalidTransition {
                run_id,
                from,
                attempted,
            } => Self::InvalidTransition {
                run_id,
                from,
                attempted,
            },
            StateMachineError::GuardFailed { run_id, reason } => {
                Self::GuardFailed { run_id, reason }
            }
            StateMachineError::RunNotFound(run_id) => Self::RunNotFound(run_id),
            StateMachineError::Repository(e) => Self::Repository(e),
            StateMachineError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<PluginError> for OrchestrationError {
    fn from(error: PluginError) -> Self {
        match error {
            PluginError::NotRegistered(name) => Self::PluginNotFound(name),
            PluginError::ScopeMismatch { plugin, scope } => {
                Self::PluginScopeMismatch { plugin, scope }
            }
            PluginError::AlreadyRunning {
                scope,
                target_id,
                execution_id,
            } => Self::PluginAlreadyRunning {
                scope,
                target_id,
                execution_id,
            },
            PluginError::ExecutionNotFound(id) => Self::ExecutionNotFound(id),
            PluginError::MissingSettings { plugin, missing } => Self::InvalidRequest(format!(
                "plugin '{plugin}' requires settings: {}",
                missing.join(", ")
            )),
            PluginError::InvalidSettings(reason) => Self::InvalidRequest(reason),
            PluginError::Routine {
                execution_id,
                message,
            } => Self::PluginRoutineError {
                execution_id,
                message,
            },
        }
    }
}

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;
