use super::events::RunEvent;
use super::states::RunState;
use crate::models::Run;
use chrono::{DateTime, Utc};

/// Trait for implementing bookkeeping applied together with a state change
///
/// Actions run against the in-memory copy of the run before it is saved, so
/// the new status and its bookkeeping land in a single repository write.
pub trait TransitionAction: Send + Sync {
    /// Execute the action
    fn apply(
        &self,
        run: &mut Run,
        from: RunState,
        to: RunState,
        event: &RunEvent,
        now: DateTime<Utc>,
    );

    /// Get a description of this action for logging
    fn description(&self) -> &'static str;
}

/// Opens a new attempt on execute and restart
pub struct BeginAttemptAction;

impl TransitionAction for BeginAttemptAction {
    fn apply(
        &self,
        run: &mut Run,
        _from: RunState,
        _to: RunState,
        event: &RunEvent,
        now: DateTime<Utc>,
    ) {
        if !event.begins_attempt() {
            return;
        }
        run.execution_count += 1;
        run.started_at = Some(now);
        run.ended_at = None;
        run.process_id = None;
        run.command = None;
        run.exit_code = None;
        run.failure_reason = None;

        if let RunEvent::Restart { mode } = event {
            run.last_restarted_at = Some(now);
            run.last_restart_mode = Some(*mode);
        }
    }

    fn description(&self) -> &'static str {
        "Open a new execution attempt"
    }
}

/// Records the process identity of the current attempt
pub struct RecordSpawnAction;

impl TransitionAction for RecordSpawnAction {
    fn apply(
        &self,
        run: &mut Run,
        _from: RunState,
        _to: RunState,
        event: &RunEvent,
        _now: DateTime<Utc>,
    ) {
        if let RunEvent::Spawned { pid, command, .. } = event {
            run.process_id = Some(*pid);
            run.command = Some(command.clone());
        }
    }

    fn description(&self) -> &'static str {
        "Record spawned process"
    }
}

/// Closes the current attempt with its end timestamp and outcome
pub struct FinalizeAttemptAction;

impl TransitionAction for FinalizeAttemptAction {
    fn apply(
        &self,
        run: &mut Run,
        _from: RunState,
        to: RunState,
        event: &RunEvent,
        now: DateTime<Utc>,
    ) {
        if !to.is_terminal() {
            return;
        }
        run.ended_at = Some(now);
        run.process_id = None;
        run.exit_code = event.exit_code();
        run.failure_reason = event.failure_reason();
    }

    fn description(&self) -> &'static str {
        "Finalize attempt bookkeeping"
    }
}

/// Actions applied for every transition, in order
pub fn default_actions() -> Vec<Box<dyn TransitionAction>> {
    vec![
        Box::new(BeginAttemptAction),
        Box::new(RecordSpawnAction),
        Box::new(FinalizeAttemptAction),
    ]
}
