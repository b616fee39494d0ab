use super::{
    actions::{default_actions, TransitionAction},
    errors::{StateMachineError, StateMachineResult},
    events::RunEvent,
    guards::{default_guards, TransitionGuard},
    locks::RunLocks,
    states::RunState,
};
use crate::constants::TRANSITION_CHANNEL_CAPACITY;
use crate::models::Run;
use crate::repository::RunRepository;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Published after every applied transition
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub run_id: Uuid,
    pub from: RunState,
    pub to: RunState,
    pub event_type: &'static str,
    pub attempt: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Result of submitting an event
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The event was applied and persisted
    Applied { from: RunState, to: RunState, run: Run },
    /// The event was a duplicate or a late report and changed nothing
    Ignored { current: RunState, reason: String },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    pub fn state(&self) -> RunState {
        match self {
            Self::Applied { to, .. } => *to,
            Self::Ignored { current, .. } => *current,
        }
    }
}

/// Authoritative run lifecycle
///
/// All status changes go through [`RunStateMachine::transition`], which holds
/// the run's lock while it loads, checks guards, applies bookkeeping, and
/// saves. Requests that are illegal for the current state are rejected with
/// `InvalidTransition`; supervisor reports that no longer apply are collapsed
/// into [`TransitionOutcome::Ignored`].
pub struct RunStateMachine {
    repository: Arc<dyn RunRepository>,
    locks: RunLocks,
    guards: Vec<Box<dyn TransitionGuard>>,
    actions: Vec<Box<dyn TransitionAction>>,
    transitions: broadcast::Sender<TransitionRecord>,
}

impl std::fmt::Debug for RunStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStateMachine")
            .field("guards", &self.guards.len())
            .field("actions", &self.actions.len())
            .field("subscribers", &self.transitions.receiver_count())
            .finish()
    }
}

impl RunStateMachine {
    /// Create a new run state machine instance
    pub fn new(repository: Arc<dyn RunRepository>) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            repository,
            locks: RunLocks::new(),
            guards: default_guards(),
            actions: default_actions(),
            transitions,
        }
    }

    pub fn repository(&self) -> &Arc<dyn RunRepository> {
        &self.repository
    }

    /// Receive every applied transition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionRecord> {
        self.transitions.subscribe()
    }

    /// Persist a newly created run
    pub async fn register(&self, run: Run) -> StateMachineResult<Run> {
        if run.status != RunState::Created || run.execution_count != 0 {
            return Err(StateMachineError::Internal(format!(
                "run {} must be registered in the created state",
                run.run_id
            )));
        }
        let _guard = self.locks.acquire(run.run_id).await;
        if self.repository.get(run.run_id).await?.is_some() {
            return Err(StateMachineError::Internal(format!(
                "run {} is already registered",
                run.run_id
            )));
        }
        self.repository.save(&run).await?;
        debug!(run_id = %run.run_id, "📋 RUN_STATE: Registered run in created state");
        Ok(run)
    }

    /// Load a run record
    pub async fn load(&self, run_id: Uuid) -> StateMachineResult<Run> {
        self.repository
            .get(run_id)
            .await?
            .ok_or(StateMachineError::RunNotFound(run_id))
    }

    /// Get the current state of the run
    pub async fn current_state(&self, run_id: Uuid) -> StateMachineResult<RunState> {
        Ok(self.load(run_id).await?.status)
    }

    /// Attempt to transition the run
    pub async fn transition(
        &self,
        run_id: Uuid,
        event: RunEvent,
    ) -> StateMachineResult<TransitionOutcome> {
        let _guard = self.locks.acquire(run_id).await;
        let mut run = self.load(run_id).await?;
        let current = run.status;

        // Check guards
        for guard in &self.guards {
            if let Err(err) = guard.check(&run, &event) {
                if err.is_stale() {
                    debug!(
                        run_id = %run_id,
                        event = event.event_type(),
                        current = %current,
                        "⏭️ RUN_STATE: Ignoring stale report ({err})"
                    );
                    return Ok(TransitionOutcome::Ignored {
                        current,
                        reason: err.to_string(),
                    });
                }
                warn!(
                    run_id = %run_id,
                    guard = guard.description(),
                    "🚫 RUN_STATE: Guard rejected {}: {err}",
                    event.operation()
                );
                return Err(StateMachineError::GuardFailed {
                    run_id,
                    reason: err.to_string(),
                });
            }
        }

        let target = match determine_target_state(current, &event) {
            Some(target) => target,
            None if event.attempt().is_some() => {
                // Reports about the current attempt that no longer fit are duplicates
                debug!(
                    run_id = %run_id,
                    event = event.event_type(),
                    current = %current,
                    "⏭️ RUN_STATE: Collapsing duplicate report"
                );
                return Ok(TransitionOutcome::Ignored {
                    current,
                    reason: format!("{} has no effect on a {current} run", event.operation()),
                });
            }
            None => {
                return Err(StateMachineError::InvalidTransition {
                    run_id,
                    from: current,
                    attempted: event.operation().to_string(),
                })
            }
        };

        // Apply bookkeeping, then persist status and bookkeeping together
        let now = Utc::now();
        for action in &self.actions {
            action.apply(&mut run, current, target, &event, now);
        }
        run.status = target;
        self.repository.save(&run).await?;

        if current != target {
            info!(
                run_id = %run_id,
                attempt = run.execution_count,
                event = event.event_type(),
                "🔄 RUN_STATE: {current} → {target}"
            );
        }

        let record = TransitionRecord {
            run_id,
            from: current,
            to: target,
            event_type: event.event_type(),
            attempt: run.execution_count,
            occurred_at: now,
        };
        // No subscribers is fine
        let _ = self.transitions.send(record);

        Ok(TransitionOutcome::Applied {
            from: current,
            to: target,
            run,
        })
    }
}

/// Determine the target state for an event, or `None` if it does not apply
pub fn determine_target_state(current: RunState, event: &RunEvent) -> Option<RunState> {
    let target = match (current, event) {
        // New attempts
        (RunState::Created, RunEvent::Execute) => RunState::Starting,
        (state, RunEvent::Restart { .. }) if state.is_restartable() => RunState::Starting,

        // Process launched; bookkeeping only
        (RunState::Starting, RunEvent::Spawned { .. }) => RunState::Starting,

        // Liveness confirmed
        (RunState::Starting, RunEvent::ProcessAlive { .. }) => RunState::Running,

        // Natural exit; a fast process may exit before liveness is confirmed
        (
            RunState::Starting | RunState::Running,
            RunEvent::ProcessExited {
                exit_code: Some(0),
                signal: None,
                ..
            },
        ) => RunState::Succeeded,
        (RunState::Starting | RunState::Running, RunEvent::ProcessExited { .. }) => {
            RunState::Failed
        }

        // Operator termination
        (RunState::Starting | RunState::Running, RunEvent::Stopped { .. }) => RunState::Stopped,
        (RunState::Starting | RunState::Running, RunEvent::Killed { .. }) => RunState::Killed,

        // Faults
        (RunState::Starting, RunEvent::SpawnFailed { .. }) => RunState::Failed,
        (RunState::Starting | RunState::Running, RunEvent::SupervisionLost { .. }) => {
            RunState::Failed
        }

        _ => return None,
    };
    Some(target)
}
