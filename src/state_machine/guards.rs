use super::errors::{business_rule_violation, GuardError, GuardResult};
use super::events::RunEvent;
use crate::models::Run;

/// Trait for implementing state transition guards
///
/// Guards inspect the run as loaded under the per-run lock and reject a
/// transition before anything is written.
pub trait TransitionGuard: Send + Sync {
    /// Check if a transition is allowed
    fn check(&self, run: &Run, event: &RunEvent) -> GuardResult<()>;

    /// Get a description of this guard for logging
    fn description(&self) -> &'static str;
}

/// Guard that collapses supervisor reports about an attempt that is no longer current
pub struct AttemptCurrentGuard;

impl TransitionGuard for AttemptCurrentGuard {
    fn check(&self, run: &Run, event: &RunEvent) -> GuardResult<()> {
        match event.attempt() {
            Some(reported) if reported != run.execution_count => Err(GuardError::StaleAttempt {
                reported,
                current: run.execution_count,
            }),
            _ => Ok(()),
        }
    }

    fn description(&self) -> &'static str {
        "Supervisor reports must refer to the current attempt"
    }
}

/// Guard that refuses to begin an attempt from an unusable snapshot
pub struct SnapshotCompleteGuard;

impl TransitionGuard for SnapshotCompleteGuard {
    fn check(&self, run: &Run, event: &RunEvent) -> GuardResult<()> {
        if !event.begins_attempt() {
            return Ok(());
        }
        run.snapshot()
            .validate()
            .map_err(|reason| GuardError::IncompleteSnapshot { reason })
    }

    fn description(&self) -> &'static str {
        "Run snapshot must describe a complete invocation"
    }
}

/// Guard that refuses spawn reports without a process identifier
pub struct SpawnRecordedGuard;

impl TransitionGuard for SpawnRecordedGuard {
    fn check(&self, _run: &Run, event: &RunEvent) -> GuardResult<()> {
        match event {
            RunEvent::Spawned { pid: 0, .. } => {
                Err(business_rule_violation("spawned process reported pid 0"))
            }
            _ => Ok(()),
        }
    }

    fn description(&self) -> &'static str {
        "Spawn reports must carry a process identifier"
    }
}

/// Guards evaluated for every transition, in order
pub fn default_guards() -> Vec<Box<dyn TransitionGuard>> {
    vec![
        Box::new(AttemptCurrentGuard),
        Box::new(SnapshotCompleteGuard),
        Box::new(SpawnRecordedGuard),
    ]
}
