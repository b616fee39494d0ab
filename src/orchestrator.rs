//! # Run Orchestrator
//!
//! The caller-facing control surface. Wires the state machine, process
//! supervisor, health monitor, restart controller, and plugin coordinator
//! together and serializes caller operations per run.
//!
//! ```rust,no_run
//! use runforge_core::config::OrchestratorConfig;
//! use runforge_core::orchestrator::{CreateRunRequest, RunOrchestrator};
//! use runforge_core::plugins::PluginRegistry;
//! use runforge_core::repository::{InMemoryNoteSink, InMemoryRevisionStore, InMemoryRunRepository};
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! # async fn example(experiment_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = RunOrchestrator::new(
//!     OrchestratorConfig::default(),
//!     Arc::new(InMemoryRunRepository::new()),
//!     Arc::new(InMemoryRevisionStore::new()),
//!     Arc::new(InMemoryNoteSink::new()),
//!     Arc::new(PluginRegistry::new()),
//! );
//!
//! let run = orchestrator
//!     .launch_run(CreateRunRequest::new(experiment_id).with_description("baseline"))
//!     .await?;
//! println!("{} is {}", run.run_id, orchestrator.status(run.run_id).await?.status);
//! # Ok(())
//! # }
//! ```

use crate::config::OrchestratorConfig;
use crate::constants::ORPHANED_BY_RESTART_REASON;
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::health::{HealthMonitor, HealthPolicy};
use crate::logging::log_run_operation;
use crate::models::{
    HealthSample, PluginExecution, PluginScope, RestartMode, Revision, Run, RunSnapshot,
    RunStatusReport,
};
use crate::plugins::{PluginCoordinator, PluginRegistry, RunControl};
use crate::repository::{NoteSink, RevisionStore, RunRepository};
use crate::restart::RestartController;
use crate::state_machine::{
    RunEvent, RunLocks, RunState, RunStateMachine, TransitionOutcome, TransitionRecord,
};
use crate::supervisor::{run_log, LaunchReceipt, ProcessSupervisor, RunLayout, SupervisorError};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_KILL_REASON: &str = "killed by operator";

/// Parameters for creating a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateRunRequest {
    pub experiment_id: Uuid,
    /// Revision to freeze; the experiment's latest when unset
    pub revision_id: Option<Uuid>,
    pub description: String,
    pub parent_run_id: Option<Uuid>,
    /// Trainer flags overlaid on the revision's flags
    pub cli_flags: BTreeMap<String, Value>,
    pub enabled_plugins: Vec<String>,
}

impl CreateRunRequest {
    pub fn new(experiment_id: Uuid) -> Self {
        Self {
            experiment_id,
            ..Self::default()
        }
    }

    pub fn with_revision(mut self, revision_id: Uuid) -> Self {
        self.revision_id = Some(revision_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parent_run(mut self, parent_run_id: Uuid) -> Self {
        self.parent_run_id = Some(parent_run_id);
        self
    }

    pub fn with_cli_flag(mut self, key: impl Into<String>, value: Value) -> Self {
        self.cli_flags.insert(key.into(), value);
        self
    }

    pub fn with_enabled_plugins(mut self, plugins: Vec<String>) -> Self {
        self.enabled_plugins = plugins;
        self
    }
}

struct OrchestratorInner {
    config: OrchestratorConfig,
    state_machine: Arc<RunStateMachine>,
    supervisor: ProcessSupervisor,
    health: HealthMonitor,
    restarts: RestartController,
    layout: RunLayout,
    revisions: Arc<dyn RevisionStore>,
    notes: Arc<dyn NoteSink>,
    plugins: PluginCoordinator,
    /// Serializes caller operations (execute, stop, restart, kill) per run
    control_locks: RunLocks,
    background: CancellationToken,
}

/// Cheaply cloneable handle to the orchestration engine
#[derive(Clone)]
pub struct RunOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl std::fmt::Debug for RunOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOrchestrator")
            .field("environment", &self.inner.config.environment)
            .field("runs_root", &self.inner.layout.runs_root())
            .field("live_processes", &self.inner.supervisor.registry().len())
            .field("plugins", &self.inner.plugins)
            .finish()
    }
}

impl RunOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        runs: Arc<dyn RunRepository>,
        revisions: Arc<dyn RevisionStore>,
        notes: Arc<dyn NoteSink>,
        plugin_registry: Arc<PluginRegistry>,
    ) -> Self {
        let state_machine = Arc::new(RunStateMachine::new(runs));
        let supervisor = ProcessSupervisor::new(state_machine.clone(), config.supervisor.clone());
        let health = HealthMonitor::new(
            state_machine.clone(),
            supervisor.clone(),
            HealthPolicy::from_config(&config.health),
        );
        let restarts = RestartController::new(state_machine.clone(), supervisor.clone());
        let layout = RunLayout::new(config.runs_root());
        let plugins = PluginCoordinator::new(plugin_registry, config.plugins.clone());

        info!(
            environment = %config.environment,
            runs_root = %layout.runs_root().display(),
            trainer = %config.supervisor.trainer_program,
            "🎛️ ORCHESTRATOR: Initialized"
        );

        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                state_machine,
                supervisor,
                health,
                restarts,
                layout,
                revisions,
                notes,
                plugins,
                control_locks: RunLocks::new(),
                background: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn state_machine(&self) -> &Arc<RunStateMachine> {
        &self.inner.state_machine
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.inner.supervisor
    }

    pub fn health_monitor(&self) -> &HealthMonitor {
        &self.inner.health
    }

    pub fn plugins(&self) -> &PluginCoordinator {
        &self.inner.plugins
    }

    /// Applied transitions of every run
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionRecord> {
        self.inner.state_machine.subscribe()
    }

    // ----- Run lifecycle -------------------------------------------------

    /// Freeze a revision into a new run in `created`
    ///
    /// Creates the run directory and writes the configuration snapshot the
    /// process will be launched with. Nothing is spawned.
    pub async fn create_run(&self, request: CreateRunRequest) -> OrchestrationResult<Run> {
        let revision = self.resolve_revision(&request).await?;
        revision
            .validate_for_run()
            .map_err(OrchestrationError::InvalidRequest)?;

        let mut cli_flags = revision.cli_flags.clone();
        cli_flags.extend(request.cli_flags);
        let snapshot = RunSnapshot {
            trainer_program: self.inner.config.supervisor.trainer_program.clone(),
            trainer_config: revision.trainer_config.clone(),
            cli_flags,
            environment_path: revision.environment_path.clone(),
            extra_env: BTreeMap::new(),
        };
        snapshot
            .validate()
            .map_err(OrchestrationError::InvalidRequest)?;

        let run_id = Uuid::new_v4();
        let paths = self.inner.layout.prepare(run_id, &snapshot).await?;
        let run = Run::new(
            run_id,
            revision.experiment_id,
            revision.revision_id,
            snapshot,
            paths,
        )
        .with_description(request.description)
        .with_parent_run(request.parent_run_id)
        .with_enabled_plugins(request.enabled_plugins);

        let run = self.inner.state_machine.register(run).await?;
        log_run_operation(
            "create",
            run.run_id,
            None,
            run.status.as_str(),
            Some(&revision.name),
        );
        Ok(run)
    }

    async fn resolve_revision(&self, request: &CreateRunRequest) -> OrchestrationResult<Revision> {
        let revision = match request.revision_id {
            Some(revision_id) => self
                .inner
                .revisions
                .get(revision_id)
                .await?
                .ok_or(OrchestrationError::RevisionNotFound(revision_id))?,
            None => self
                .inner
                .revisions
                .latest_revision(request.experiment_id)
                .await?
                .ok_or(OrchestrationError::NoRevisions(request.experiment_id))?,
        };
        if revision.experiment_id != request.experiment_id {
            return Err(OrchestrationError::InvalidRequest(format!(
                "revision {} belongs to experiment {}, not {}",
                revision.revision_id, revision.experiment_id, request.experiment_id
            )));
        }
        Ok(revision)
    }

    /// Create a run and start its first attempt
    pub async fn launch_run(&self, request: CreateRunRequest) -> OrchestrationResult<Run> {
        let run = self.create_run(request).await?;
        self.execute(run.run_id).await?;
        self.get_run(run.run_id).await
    }

    /// Start a `created` run
    pub async fn execute(&self, run_id: Uuid) -> OrchestrationResult<LaunchReceipt> {
        let _guard = self.inner.control_locks.acquire(run_id).await;
        let receipt = self.inner.restarts.execute(run_id).await?;
        log_run_operation("execute", run_id, Some(receipt.attempt), "starting", None);
        Ok(receipt)
    }

    /// Start a new attempt of a terminal run
    pub async fn restart(&self, run_id: Uuid, mode: RestartMode) -> OrchestrationResult<LaunchReceipt> {
        let _guard = self.inner.control_locks.acquire(run_id).await;
        self.inner.restarts.restart(run_id, mode).await
    }

    /// Graceful stop with the configured grace period
    pub async fn stop(&self, run_id: Uuid) -> OrchestrationResult<RunState> {
        self.stop_with_timeout(run_id, self.inner.config.supervisor.stop_grace_period())
            .await
    }

    /// Graceful stop, escalating to a kill after `grace`
    ///
    /// A live run whose process is no longer supervised is marked `stopped`
    /// directly.
    pub async fn stop_with_timeout(&self, run_id: Uuid, grace: Duration) -> OrchestrationResult<RunState> {
        let _guard = self.inner.control_locks.acquire(run_id).await;
        let run = self.live_run(run_id, "stop").await?;

        if !self.inner.supervisor.is_live(run_id) {
            warn!(run_id = %run_id, "⚠️ ORCHESTRATOR: Stopping run with no live process");
            let event = RunEvent::Stopped {
                attempt: run.execution_count,
                exit_code: None,
            };
            return Ok(self.inner.state_machine.transition(run_id, event).await?.state());
        }

        match self.inner.supervisor.stop(run_id, grace).await {
            Ok(state) => {
                log_run_operation("stop", run_id, Some(run.execution_count), state.as_str(), None);
                Ok(state)
            }
            // The process exited between the check and the signal
            Err(SupervisorError::NotRunning(_)) => {
                Ok(self.inner.state_machine.current_state(run_id).await?)
            }
            Err(e) => Err(OrchestrationError::from_supervisor(run_id, e)),
        }
    }

    /// Unconditional termination; the run ends `killed`
    pub async fn force_kill(&self, run_id: Uuid, reason: Option<&str>) -> OrchestrationResult<RunState> {
        let _guard = self.inner.control_locks.acquire(run_id).await;
        let run = self.live_run(run_id, "force_kill").await?;
        let reason = reason.unwrap_or(DEFAULT_KILL_REASON).to_string();

        if !self.inner.supervisor.is_live(run_id) {
            let event = RunEvent::Killed {
                attempt: run.execution_count,
                reason,
            };
            return Ok(self.inner.state_machine.transition(run_id, event).await?.state());
        }

        match self.inner.supervisor.force_kill(run_id, reason).await {
            Ok(state) => {
                log_run_operation("force_kill", run_id, Some(run.execution_count), state.as_str(), None);
                Ok(state)
            }
            Err(SupervisorError::NotRunning(_)) => {
                Ok(self.inner.state_machine.current_state(run_id).await?)
            }
            Err(e) => Err(OrchestrationError::from_supervisor(run_id, e)),
        }
    }

    /// Load a run that must be `starting` or `running` for `operation`
    async fn live_run(&self, run_id: Uuid, operation: &str) -> OrchestrationResult<Run> {
        let run = self.inner.state_machine.load(run_id).await?;
        if !run.status.is_live() {
            return Err(OrchestrationError::InvalidTransition {
                run_id,
                from: run.status,
                attempted: operation.to_string(),
            });
        }
        Ok(run)
    }

    // ----- Queries -------------------------------------------------------

    pub async fn get_run(&self, run_id: Uuid) -> OrchestrationResult<Run> {
        Ok(self.inner.state_machine.load(run_id).await?)
    }

    /// Runs of an experiment, oldest first
    pub async fn list_runs(&self, experiment_id: Uuid) -> OrchestrationResult<Vec<Run>> {
        Ok(self
            .inner
            .state_machine
            .repository()
            .list_by_experiment(experiment_id)
            .await?)
    }

    pub async fn status(&self, run_id: Uuid) -> OrchestrationResult<RunStatusReport> {
        let run = self.get_run(run_id).await?;
        Ok(RunStatusReport::from(&run))
    }

    pub async fn health(&self, run_id: Uuid) -> OrchestrationResult<HealthSample> {
        Ok(self.inner.health.sample(run_id).await?)
    }

    /// Every live run currently classified stuck
    pub async fn stale_runs(&self) -> OrchestrationResult<Vec<HealthSample>> {
        Ok(self.inner.health.stale_runs().await?)
    }

    /// Full accumulated log text of every attempt
    pub async fn logs(&self, run_id: Uuid) -> OrchestrationResult<String> {
        let run = self.get_run(run_id).await?;
        Ok(run_log::read_all(run.log_path()).await?)
    }

    pub async fn tail_logs(&self, run_id: Uuid, max_lines: usize) -> OrchestrationResult<String> {
        let run = self.get_run(run_id).await?;
        Ok(run_log::tail(run.log_path(), max_lines).await?)
    }

    // ----- Plugins -------------------------------------------------------

    pub fn start_plugin(
        &self,
        plugin_name: &str,
        target_id: Uuid,
        scope: PluginScope,
        settings: Value,
    ) -> OrchestrationResult<PluginExecution> {
        let control: Arc<dyn RunControl> = Arc::new(self.clone());
        Ok(self
            .inner
            .plugins
            .start_plugin(plugin_name, target_id, scope, settings, control)?)
    }

    pub fn stop_plugin(&self, execution_id: Uuid) -> OrchestrationResult<PluginExecution> {
        Ok(self.inner.plugins.stop_plugin(execution_id)?)
    }

    pub fn list_executions(&self, target_id: Uuid, scope: Option<PluginScope>) -> Vec<PluginExecution> {
        self.inner.plugins.list_executions(target_id, scope)
    }

    pub fn get_plugin_execution(&self, execution_id: Uuid) -> OrchestrationResult<PluginExecution> {
        self.inner
            .plugins
            .get_execution(execution_id)
            .ok_or(OrchestrationError::ExecutionNotFound(execution_id))
    }

    // ----- Process lifecycle ---------------------------------------------

    /// Fail every persisted live run that has no supervised process
    ///
    /// Run once at startup, before any launch. Returns the recovered runs.
    pub async fn recover_orphans(&self) -> OrchestrationResult<Vec<Uuid>> {
        let repository = self.inner.state_machine.repository().clone();
        let mut recovered = Vec::new();
        for status in [RunState::Starting, RunState::Running] {
            for run in repository.list_by_status(status).await? {
                if self.inner.supervisor.is_live(run.run_id) {
                    continue;
                }
                let event = RunEvent::SupervisionLost {
                    attempt: run.execution_count,
                    reason: ORPHANED_BY_RESTART_REASON.to_string(),
                };
                if let TransitionOutcome::Applied { .. } =
                    self.inner.state_machine.transition(run.run_id, event).await?
                {
                    recovered.push(run.run_id);
                }
            }
        }
        if !recovered.is_empty() {
            warn!(
                count = recovered.len(),
                "⚠️ ORCHESTRATOR: Marked orphaned runs as failed"
            );
        }
        Ok(recovered)
    }

    /// Periodic stuck-run logging until shutdown
    pub fn start_health_sampler(&self) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.inner.config.health.sampling_interval_seconds);
        self.inner
            .health
            .spawn_sampler(interval, self.inner.background.child_token())
    }

    /// Stop plugin routines, then every live run, concurrently
    pub async fn shutdown(&self) -> Vec<(Uuid, OrchestrationResult<RunState>)> {
        let grace = self.inner.config.supervisor.stop_grace_period();
        info!(grace_seconds = grace.as_secs(), "🛑 ORCHESTRATOR: Shutting down");
        self.inner.background.cancel();

        if !self.inner.plugins.shutdown(grace).await {
            warn!("⚠️ ORCHESTRATOR: Plugin routines still running after {}s", grace.as_secs());
        }

        let live = self.inner.supervisor.registry().live();
        join_all(live.into_iter().map(|process| async move {
            (
                process.run_id,
                self.stop_with_timeout(process.run_id, grace).await,
            )
        }))
        .await
    }
}

#[async_trait]
impl RunControl for RunOrchestrator {
    async fn launch_run(&self, request: CreateRunRequest) -> OrchestrationResult<Run> {
        RunOrchestrator::launch_run(self, request).await
    }

    async fn get_run(&self, run_id: Uuid) -> OrchestrationResult<Run> {
        RunOrchestrator::get_run(self, run_id).await
    }

    async fn list_runs(&self, experiment_id: Uuid) -> OrchestrationResult<Vec<Run>> {
        RunOrchestrator::list_runs(self, experiment_id).await
    }

    async fn tail_logs(&self, run_id: Uuid, max_lines: usize) -> OrchestrationResult<String> {
        RunOrchestrator::tail_logs(self, run_id, max_lines).await
    }

    fn subscribe(&self) -> broadcast::Receiver<TransitionRecord> {
        RunOrchestrator::subscribe(self)
    }

    fn revisions(&self) -> Arc<dyn RevisionStore> {
        self.inner.revisions.clone()
    }

    fn notes(&self) -> Arc<dyn NoteSink> {
        self.inner.notes.clone()
    }
}
