//! # Plugin API
//!
//! The control surface handed to routines. Everything here goes through the
//! same operations available to human operators; routines never touch run
//! bookkeeping directly.

use super::coordinator::ExecutionTable;
use super::merge::{merge_hyperparameters, mutate_numeric, MergeStrategy};
use crate::config::PluginsConfig;
use crate::constants::MIN_WATCHER_POLL;
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::logging::log_plugin_operation;
use crate::models::{PluginScope, Revision, Run, RunStatusReport};
use crate::orchestrator::CreateRunRequest;
use crate::repository::{NoteSink, RevisionStore};
use crate::state_machine::{RunState, TransitionRecord};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Run operations a routine may invoke
///
/// Implemented by the orchestrator; routines only see it through
/// [`PluginApi`].
#[async_trait]
pub trait RunControl: Send + Sync {
    /// Create a run and start its first attempt
    async fn launch_run(&self, request: CreateRunRequest) -> OrchestrationResult<Run>;

    async fn get_run(&self, run_id: Uuid) -> OrchestrationResult<Run>;

    /// Every run of an experiment, oldest first
    async fn list_runs(&self, experiment_id: Uuid) -> OrchestrationResult<Vec<Run>>;

    /// Last `max_lines` lines of the run's log
    async fn tail_logs(&self, run_id: Uuid, max_lines: usize) -> OrchestrationResult<String>;

    /// Applied transitions of every run
    fn subscribe(&self) -> broadcast::Receiver<TransitionRecord>;

    fn revisions(&self) -> Arc<dyn RevisionStore>;

    fn notes(&self) -> Arc<dyn NoteSink>;
}

/// A run created by a routine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: Uuid,
    pub experiment_id: Uuid,
    pub revision_id: Uuid,
}

impl From<&Run> for RunHandle {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.run_id,
            experiment_id: run.experiment_id,
            revision_id: run.revision_id,
        }
    }
}

/// Result of waiting on a set of runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    /// Runs that reached a terminal state, with that state
    pub finished: BTreeMap<Uuid, RunState>,
    /// Runs still live when the wait ended
    pub pending: Vec<Uuid>,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CompletionReport {
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn succeeded(&self) -> Vec<Uuid> {
        self.finished
            .iter()
            .filter(|(_, state)| **state == RunState::Succeeded)
            .map(|(run_id, _)| *run_id)
            .collect()
    }
}

/// Runs and revisions of the experiment an execution belongs to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentData {
    pub experiment_id: Uuid,
    pub runs: Vec<Run>,
    pub revisions: Vec<Revision>,
}

/// API surface of one plugin execution
#[derive(Clone)]
pub struct PluginApi {
    execution_id: Uuid,
    plugin_name: String,
    scope: PluginScope,
    target_id: Uuid,
    control: Arc<dyn RunControl>,
    executions: ExecutionTable,
    cancellation: CancellationToken,
    config: PluginsConfig,
}

impl fmt::Debug for PluginApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginApi")
            .field("execution_id", &self.execution_id)
            .field("plugin_name", &self.plugin_name)
            .field("scope", &self.scope)
            .field("target_id", &self.target_id)
            .finish_non_exhaustive()
    }
}

impl PluginApi {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        execution_id: Uuid,
        plugin_name: String,
        scope: PluginScope,
        target_id: Uuid,
        control: Arc<dyn RunControl>,
        executions: ExecutionTable,
        cancellation: CancellationToken,
        config: PluginsConfig,
    ) -> Self {
        Self {
            execution_id,
            plugin_name,
            scope,
            target_id,
            control,
            executions,
            cancellation,
            config,
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn should_stop(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Experiment the execution ultimately belongs to
    pub async fn experiment_id(&self) -> OrchestrationResult<Uuid> {
        match self.scope {
            PluginScope::Experiment => Ok(self.target_id),
            PluginScope::Run => Ok(self.control.get_run(self.target_id).await?.experiment_id),
            PluginScope::Revision => Ok(self.target_revision().await?.experiment_id),
        }
    }

    async fn target_revision(&self) -> OrchestrationResult<Revision> {
        self.control
            .revisions()
            .get(self.target_id)
            .await?
            .ok_or(OrchestrationError::RevisionNotFound(self.target_id))
    }

    async fn latest_revision(&self) -> OrchestrationResult<Revision> {
        let experiment_id = self.experiment_id().await?;
        self.control
            .revisions()
            .latest_revision(experiment_id)
            .await?
            .ok_or(OrchestrationError::NoRevisions(experiment_id))
    }

    /// Create and launch a run for the execution's target
    ///
    /// `cli_flags` overlay the revision's trainer flags. Experiment-scoped
    /// executions use the experiment's latest revision; run-scoped ones reuse
    /// the target run's revision and record it as parent.
    pub async fn create_run(
        &self,
        cli_flags: BTreeMap<String, Value>,
        description: &str,
    ) -> OrchestrationResult<RunHandle> {
        let request = match self.scope {
            PluginScope::Experiment => CreateRunRequest::new(self.target_id),
            PluginScope::Run => {
                let parent = self.control.get_run(self.target_id).await?;
                CreateRunRequest::new(parent.experiment_id)
                    .with_revision(parent.revision_id)
                    .with_parent_run(parent.run_id)
            }
            PluginScope::Revision => {
                let revision = self.target_revision().await?;
                CreateRunRequest::new(revision.experiment_id).with_revision(revision.revision_id)
            }
        };
        self.launch(request, cli_flags, description).await
    }

    /// Create and launch a run from a specific revision
    pub async fn create_run_from_revision(
        &self,
        revision: &Revision,
        cli_flags: BTreeMap<String, Value>,
        description: &str,
    ) -> OrchestrationResult<RunHandle> {
        let request =
            CreateRunRequest::new(revision.experiment_id).with_revision(revision.revision_id);
        self.launch(request, cli_flags, description).await
    }

    async fn launch(
        &self,
        mut request: CreateRunRequest,
        cli_flags: BTreeMap<String, Value>,
        description: &str,
    ) -> OrchestrationResult<RunHandle> {
        request.cli_flags.extend(cli_flags);
        request.description = if description.is_empty() {
            format!("Created by {}", self.plugin_name)
        } else {
            description.to_string()
        };

        let run = self.control.launch_run(request).await?;
        let handle = RunHandle::from(&run);
        if let Some(mut execution) = self.executions.get_mut(&self.execution_id) {
            execution.created_runs.push(run.run_id);
        }
        log_plugin_operation(
            "create_run",
            &self.plugin_name,
            Some(self.execution_id),
            Some(run.run_id),
            run.status.as_str(),
            None,
        );
        Ok(handle)
    }

    /// Derive a revision from the latest one with merged hyperparameters
    ///
    /// Without a behavior name every behavior receives the update.
    pub async fn create_revision_with_hyperparameters(
        &self,
        name: &str,
        hyperparameters: &Map<String, Value>,
        behavior_name: Option<&str>,
        notes: &str,
    ) -> OrchestrationResult<Revision> {
        let base = self.latest_revision().await?;
        let mut config = base.trainer_config.clone();
        merge_hyperparameters(&mut config, hyperparameters, behavior_name)
            .map_err(OrchestrationError::InvalidRequest)?;
        self.store_revision(&base, name, config, notes).await
    }

    /// Derive a revision from the latest one with arbitrary config updates
    pub async fn create_revision_with_config_updates(
        &self,
        name: &str,
        updates: &Value,
        strategy: MergeStrategy,
        notes: &str,
    ) -> OrchestrationResult<Revision> {
        if !updates.is_object() {
            return Err(OrchestrationError::InvalidRequest(
                "configuration updates must be a mapping".to_string(),
            ));
        }
        let base = self.latest_revision().await?;
        let mut config = base.trainer_config.clone();
        strategy.apply(&mut config, updates);
        self.store_revision(&base, name, config, notes).await
    }

    async fn store_revision(
        &self,
        base: &Revision,
        name: &str,
        config: Value,
        notes: &str,
    ) -> OrchestrationResult<Revision> {
        let description = if notes.is_empty() {
            format!("Auto-generated by {}", self.plugin_name)
        } else {
            notes.to_string()
        };
        let mut draft = base.derive(name).with_description(description);
        draft.trainer_config = config;

        let revision = self.control.revisions().create_revision(draft).await?;
        info!(
            plugin = %self.plugin_name,
            execution_id = %self.execution_id,
            revision_id = %revision.revision_id,
            parent_revision_id = %base.revision_id,
            "🧬 PLUGIN_API: Created revision {}",
            revision.name
        );
        Ok(revision)
    }

    /// Wait until every run is terminal, the timeout elapses, or the
    /// execution is stopped
    ///
    /// Expiry is not an error; the report lists the runs still pending.
    pub async fn wait_for_completion(
        &self,
        runs: &[RunHandle],
        timeout: Duration,
    ) -> OrchestrationResult<CompletionReport> {
        let deadline = Instant::now() + timeout;
        let poll = self.config.completion_poll_interval().max(MIN_WATCHER_POLL);
        let mut ticker = tokio::time::interval_at(Instant::now() + poll, poll);
        let mut transitions = self.control.subscribe();
        let mut events_open = true;

        loop {
            let mut report = self.completion_snapshot(runs).await?;
            if report.is_complete() {
                return Ok(report);
            }
            if self.should_stop() {
                report.cancelled = true;
                return Ok(report);
            }
            if Instant::now() >= deadline {
                report.timed_out = true;
                debug!(
                    execution_id = %self.execution_id,
                    pending = report.pending.len(),
                    "⏱️ PLUGIN_API: Completion wait timed out"
                );
                return Ok(report);
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = self.cancellation.cancelled() => {}
                _ = ticker.tick() => {}
                event = transitions.recv(), if events_open => match event {
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => events_open = false,
                },
            }
        }
    }

    async fn completion_snapshot(&self, runs: &[RunHandle]) -> OrchestrationResult<CompletionReport> {
        let mut report = CompletionReport::default();
        for handle in runs {
            let run = self.control.get_run(handle.run_id).await?;
            if run.status.is_terminal() {
                report.finished.insert(run.run_id, run.status);
            } else {
                report.pending.push(run.run_id);
            }
        }
        Ok(report)
    }

    /// Sleep for `duration`; `false` when interrupted by a stop request
    pub async fn wait(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancellation.cancelled() => false,
        }
    }

    /// Attach a timestamped note to the execution's experiment
    pub async fn add_note(&self, message: &str) -> OrchestrationResult<()> {
        let experiment_id = self.experiment_id().await?;
        self.write_note(experiment_id, message).await
    }

    /// Attach a timestamped note to one run
    pub async fn add_run_note(&self, run: &RunHandle, message: &str) -> OrchestrationResult<()> {
        self.write_note(run.run_id, message).await
    }

    async fn write_note(&self, target_id: Uuid, message: &str) -> OrchestrationResult<()> {
        let note = format!(
            "[{}] {}: {}",
            Utc::now().to_rfc3339(),
            self.plugin_name,
            message
        );
        self.control.notes().add_note(target_id, note).await?;
        Ok(())
    }

    pub async fn run_status(&self, run: &RunHandle) -> OrchestrationResult<RunStatusReport> {
        let run = self.control.get_run(run.run_id).await?;
        Ok(RunStatusReport::from(&run))
    }

    pub async fn tail_logs(&self, run: &RunHandle, max_lines: usize) -> OrchestrationResult<Vec<String>> {
        let text = self.control.tail_logs(run.run_id, max_lines).await?;
        Ok(text.lines().map(str::to_string).collect())
    }

    pub fn generation(&self) -> u32 {
        self.executions
            .get(&self.execution_id)
            .map(|execution| execution.generation)
            .unwrap_or_default()
    }

    /// Advance the population generation recorded on the execution
    pub fn advance_generation(&self) -> u32 {
        let generation = match self.executions.get_mut(&self.execution_id) {
            Some(mut execution) => {
                execution.generation += 1;
                execution.generation
            }
            None => 0,
        };
        debug!(
            execution_id = %self.execution_id,
            generation,
            "🧬 PLUGIN_API: Advanced generation"
        );
        generation
    }

    /// Runs of the execution's experiment, oldest first
    pub async fn experiment_runs(&self) -> OrchestrationResult<Vec<Run>> {
        let experiment_id = self.experiment_id().await?;
        self.control.list_runs(experiment_id).await
    }

    /// Revisions of the execution's experiment in creation order
    pub async fn experiment_revisions(&self) -> OrchestrationResult<Vec<Revision>> {
        let experiment_id = self.experiment_id().await?;
        Ok(self.control.revisions().list_revisions(experiment_id).await?)
    }

    /// Runs and revisions of the execution's experiment
    pub async fn experiment_data(&self) -> OrchestrationResult<ExperimentData> {
        let experiment_id = self.experiment_id().await?;
        let runs = self.control.list_runs(experiment_id).await?;
        let revisions = self.control.revisions().list_revisions(experiment_id).await?;
        Ok(ExperimentData {
            experiment_id,
            runs,
            revisions,
        })
    }

    /// Randomly perturb numeric values of `base_config`
    ///
    /// Each number changes with probability `mutation_rate` by up to ±20%.
    pub fn mutate_config(&self, base_config: &Value, mutation_rate: f64) -> OrchestrationResult<Value> {
        self.mutate_config_with_rng(base_config, mutation_rate, &mut rand::thread_rng())
    }

    /// [`mutate_config`](Self::mutate_config) driven by a caller-supplied RNG
    pub fn mutate_config_with_rng<R: Rng + ?Sized>(
        &self,
        base_config: &Value,
        mutation_rate: f64,
        rng: &mut R,
    ) -> OrchestrationResult<Value> {
        if !(0.0..=1.0).contains(&mutation_rate) {
            return Err(OrchestrationError::InvalidRequest(format!(
                "mutation rate must be within 0.0..=1.0, got {mutation_rate}"
            )));
        }
        let mutated = mutate_numeric(base_config, mutation_rate, rng);
        debug!(
            execution_id = %self.execution_id,
            mutation_rate,
            "🧬 PLUGIN_API: Mutated configuration"
        );
        Ok(mutated)
    }

    pub fn default_completion_timeout(&self) -> Duration {
        self.config.default_completion_timeout()
    }
}
