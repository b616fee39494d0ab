use super::states::RunState;
use crate::repository::RepositoryError;
use thiserror::Error;
use uuid::Uuid;

/// Error types for run state machine operations
#[derive(Error, Debug)]
pub enum StateMachineError {
    #[error("Cannot {attempted} run {run_id}: run is {from}")]
    InvalidTransition {
        run_id: Uuid,
        from: RunState,
        attempted: String,
    },

    #[error("Guard condition failed for run {run_id}: {reason}")]
    GuardFailed { run_id: Uuid, reason: String },

    #[error("Run {0} not found")]
    RunNotFound(Uuid),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Specific error type for guard condition failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Report for attempt {reported} does not match current attempt {current}")]
    StaleAttempt { reported: u32, current: u32 },

    #[error("Run snapshot is incomplete: {reason}")]
    IncompleteSnapshot { reason: String },

    #[error("Business rule violation: {rule}")]
    BusinessRuleViolation { rule: String },
}

impl GuardError {
    /// Stale reports are collapsed rather than rejected
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleAttempt { .. })
    }
}

/// Result type alias for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;
pub type GuardResult<T> = Result<T, GuardError>;

/// Helper function to create internal errors
pub fn internal_error(msg: impl Into<String>) -> StateMachineError {
    StateMachineError::Internal(msg.into())
}

/// Helper function to create business rule violations
pub fn business_rule_violation(rule: impl Into<String>) -> GuardError {
    GuardError::BusinessRuleViolation { rule: rule.into() }
}
