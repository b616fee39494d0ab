use crate::error::{OrchestrationError, OrchestrationResult};
use crate::logging::log_run_operation;
use crate::models::{LaunchMode, RestartMode};
use crate::state_machine::{RunEvent, RunStateMachine, TransitionOutcome};
use crate::supervisor::{LaunchReceipt, ProcessSupervisor};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Begins attempts: the first one from `created`, later ones from a
/// terminal state
///
/// The state machine owns the bookkeeping (`execution_count`,
/// `last_restarted_at`, cleared process handle); the controller only sequences
/// the transition request and the launch.
#[derive(Debug, Clone)]
pub struct RestartController {
    state_machine: Arc<RunStateMachine>,
    supervisor: ProcessSupervisor,
}

impl RestartController {
    pub fn new(state_machine: Arc<RunStateMachine>, supervisor: ProcessSupervisor) -> Self {
        Self {
            state_machine,
            supervisor,
        }
    }

    /// Start a new attempt of a terminal run
    ///
    /// A `starting` or `running` run is rejected with `InvalidTransition`;
    /// stop it first.
    pub async fn restart(&self, run_id: Uuid, mode: RestartMode) -> OrchestrationResult<LaunchReceipt> {
        info!(run_id = %run_id, mode = %mode, "🔁 RESTART: Requested");
        let receipt = self
            .begin_attempt(run_id, RunEvent::Restart { mode }, mode.into())
            .await?;
        log_run_operation(
            "restart",
            run_id,
            Some(receipt.attempt),
            "starting",
            Some(&mode.to_string()),
        );
        Ok(receipt)
    }

    /// Start the first attempt of a `created` run
    pub async fn execute(&self, run_id: Uuid) -> OrchestrationResult<LaunchReceipt> {
        self.begin_attempt(run_id, RunEvent::Execute, LaunchMode::Fresh)
            .await
    }

    async fn begin_attempt(
        &self,
        run_id: Uuid,
        event: RunEvent,
        mode: LaunchMode,
    ) -> OrchestrationResult<LaunchReceipt> {
        let run = match self.state_machine.transition(run_id, event).await? {
            TransitionOutcome::Applied { run, .. } => run,
            TransitionOutcome::Ignored { current, reason } => {
                return Err(OrchestrationError::Internal(format!(
                    "attempt request for run {run_id} was ignored while {current}: {reason}"
                )));
            }
        };

        self.supervisor
            .launch(&run, mode)
            .await
            .map_err(|e| OrchestrationError::from_supervisor(run_id, e))
    }
}
