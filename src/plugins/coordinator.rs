//! # Plugin Execution Coordinator
//!
//! Runs automation routines as independent tasks. The coordinator is a
//! client of the run control surface only: it admits executions (one active
//! execution per target), hands routines their context and API, records the
//! outcome, and relays cooperative stop requests.

use super::api::{PluginApi, RunControl};
use super::context::PluginContext;
use super::errors::{PluginError, PluginResult};
use super::registry::PluginRegistry;
use super::routine::PluginRoutine;
use crate::config::PluginsConfig;
use crate::constants::{events, PLUGIN_ORPHANED_REASON};
use crate::logging::{log_error, log_plugin_operation};
use crate::models::{PluginExecution, PluginExecutionStatus, PluginScope};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared execution records, also written by [`PluginApi`]
pub(crate) type ExecutionTable = Arc<DashMap<Uuid, PluginExecution>>;

pub struct PluginCoordinator {
    registry: Arc<PluginRegistry>,
    executions: ExecutionTable,
    cancellations: DashMap<Uuid, CancellationToken>,
    completions: DashMap<Uuid, watch::Receiver<bool>>,
    /// Serializes the active-execution check with the insert
    admission: Mutex<()>,
    tasks: TaskTracker,
    config: PluginsConfig,
}

impl std::fmt::Debug for PluginCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCoordinator")
            .field("plugins", &self.registry.len())
            .field("executions", &self.executions.len())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl PluginCoordinator {
    pub fn new(registry: Arc<PluginRegistry>, config: PluginsConfig) -> Self {
        Self {
            registry,
            executions: Arc::new(DashMap::new()),
            cancellations: DashMap::new(),
            completions: DashMap::new(),
            admission: Mutex::new(()),
            tasks: TaskTracker::new(),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Start a routine against a target
    ///
    /// Rejected when the plugin is unknown, registered for another scope, its
    /// settings fail the schema, or the target already has an active
    /// execution. A finished execution is never resumed; each start creates a
    /// new record.
    pub fn start_plugin(
        &self,
        plugin_name: &str,
        target_id: Uuid,
        scope: PluginScope,
        settings: Value,
        control: Arc<dyn RunControl>,
    ) -> PluginResult<PluginExecution> {
        let descriptor = self.registry.resolve(plugin_name, scope)?;
        descriptor.validate_settings(&settings)?;
        let settings = match settings {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };

        let execution = {
            let _admission = self.admission.lock();
            if let Some(active) = self
                .executions
                .iter()
                .find(|entry| entry.targets(scope, target_id) && entry.status.is_active())
            {
                return Err(PluginError::AlreadyRunning {
                    scope,
                    target_id,
                    execution_id: active.execution_id,
                });
            }
            let execution = PluginExecution::new(plugin_name, scope, target_id, settings);
            self.executions
                .insert(execution.execution_id, execution.clone());
            execution
        };
        let execution_id = execution.execution_id;

        let cancellation = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        self.cancellations.insert(execution_id, cancellation.clone());
        self.completions.insert(execution_id, done_rx);

        let ctx = PluginContext::new(
            execution_id,
            plugin_name,
            scope,
            target_id,
            execution.settings.clone(),
            cancellation.clone(),
        );
        let api = PluginApi::new(
            execution_id,
            plugin_name.to_string(),
            scope,
            target_id,
            control,
            self.executions.clone(),
            cancellation.clone(),
            self.config.clone(),
        );

        self.tasks.spawn(run_execution(
            self.executions.clone(),
            execution_id,
            descriptor.routine(),
            ctx,
            api,
            cancellation,
            done_tx,
        ));

        log_plugin_operation(
            events::PLUGIN_EXECUTION_STARTED,
            plugin_name,
            Some(execution_id),
            Some(target_id),
            "pending",
            Some(&scope.to_string()),
        );
        Ok(execution)
    }

    /// Request a cooperative stop
    ///
    /// The execution stays active until the routine returns, then it is
    /// recorded `stopped`. Stopping a finished execution is a no-op.
    pub fn stop_plugin(&self, execution_id: Uuid) -> PluginResult<PluginExecution> {
        let mut execution = self
            .executions
            .get_mut(&execution_id)
            .ok_or(PluginError::ExecutionNotFound(execution_id))?;

        if execution.status.is_active() {
            execution.stop_requested = true;
            if let Some(token) = self.cancellations.get(&execution_id) {
                token.cancel();
            }
            info!(
                execution_id = %execution_id,
                plugin = %execution.plugin_name,
                "🛑 PLUGIN_COORDINATOR: Stop requested"
            );
        }
        Ok(execution.clone())
    }

    pub fn get_execution(&self, execution_id: Uuid) -> Option<PluginExecution> {
        self.executions
            .get(&execution_id)
            .map(|entry| entry.value().clone())
    }

    /// Executions for a target, oldest first
    pub fn list_executions(&self, target_id: Uuid, scope: Option<PluginScope>) -> Vec<PluginExecution> {
        let mut executions: Vec<PluginExecution> = self
            .executions
            .iter()
            .filter(|entry| {
                entry.target_id == target_id && scope.map_or(true, |s| entry.scope == s)
            })
            .map(|entry| entry.value().clone())
            .collect();
        executions.sort_by_key(|execution| execution.created_at);
        executions
    }

    pub fn active_executions(&self) -> Vec<PluginExecution> {
        let mut executions: Vec<PluginExecution> = self
            .executions
            .iter()
            .filter(|entry| entry.status.is_active())
            .map(|entry| entry.value().clone())
            .collect();
        executions.sort_by_key(|execution| execution.created_at);
        executions
    }

    /// Wait for an execution to finish and return its final record
    pub async fn await_execution(&self, execution_id: Uuid) -> PluginResult<PluginExecution> {
        let done = self
            .completions
            .get(&execution_id)
            .map(|entry| entry.value().clone());
        if let Some(mut done) = done {
            // A dropped sender means the task ended without signalling
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.get_execution(execution_id)
            .ok_or(PluginError::ExecutionNotFound(execution_id))
    }

    /// Like [`await_execution`](Self::await_execution), but a failed routine
    /// is returned as an error
    pub async fn await_success(&self, execution_id: Uuid) -> PluginResult<PluginExecution> {
        let execution = self.await_execution(execution_id).await?;
        match execution.status {
            PluginExecutionStatus::Failed => Err(PluginError::Routine {
                execution_id,
                message: execution.error_message.unwrap_or_default(),
            }),
            _ => Ok(execution),
        }
    }

    /// Evict finished executions older than `max_age`; returns how many
    pub fn cleanup_completed(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(max_age);
        let expired: Vec<Uuid> = self
            .executions
            .iter()
            .filter(|entry| {
                entry.status.is_finished()
                    && matches!(
                        (entry.completed_at, cutoff),
                        (Some(completed), Some(cutoff)) if completed < cutoff
                    )
            })
            .map(|entry| entry.execution_id)
            .collect();

        for execution_id in &expired {
            self.executions.remove(execution_id);
            self.cancellations.remove(execution_id);
            self.completions.remove(execution_id);
        }
        info!(
            removed = expired.len(),
            "🧹 PLUGIN_COORDINATOR: Cleaned up finished executions"
        );
        expired.len()
    }

    /// Evict finished executions past the configured retention
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_completed(self.config.execution_retention())
    }

    /// Adopt execution records persisted by a previous process
    ///
    /// Executions are never resumed across restarts: every record still
    /// pending or running is marked failed. Returns the records that were
    /// marked.
    pub fn recover_orphans(
        &self,
        persisted: impl IntoIterator<Item = PluginExecution>,
    ) -> Vec<PluginExecution> {
        let mut orphaned = Vec::new();
        for mut execution in persisted {
            if execution.status.is_active() {
                execution.status = PluginExecutionStatus::Failed;
                execution.error_message = Some(PLUGIN_ORPHANED_REASON.to_string());
                execution.completed_at = Some(Utc::now());
                orphaned.push(execution.clone());
            }
            self.executions.insert(execution.execution_id, execution);
        }
        if !orphaned.is_empty() {
            warn!(
                count = orphaned.len(),
                "⚠️ PLUGIN_COORDINATOR: Marked orphaned plugin executions as failed"
            );
        }
        orphaned
    }

    /// Stop every active execution and wait for the routines to return
    ///
    /// Returns `false` when routines were still running at the timeout.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        for execution in self.active_executions() {
            if let Err(e) = self.stop_plugin(execution.execution_id) {
                debug!("Stop during shutdown skipped: {e}");
            }
        }
        self.tasks.close();
        let drained = tokio::time::timeout(timeout, self.tasks.wait()).await.is_ok();
        self.tasks.reopen();
        drained
    }
}

async fn run_execution(
    executions: ExecutionTable,
    execution_id: Uuid,
    routine: Arc<dyn PluginRoutine>,
    ctx: PluginContext,
    api: PluginApi,
    cancellation: CancellationToken,
    done: watch::Sender<bool>,
) {
    let plugin_name = ctx.plugin_name().to_string();
    let target_id = ctx.target_id();

    if let Some(mut execution) = executions.get_mut(&execution_id) {
        execution.status = PluginExecutionStatus::Running;
        execution.started_at = Some(Utc::now());
        execution.error_message = None;
    }
    info!(
        execution_id = %execution_id,
        plugin = %plugin_name,
        target_id = %target_id,
        "▶️ PLUGIN_COORDINATOR: Executing routine"
    );

    // A nested task keeps a panicking routine from taking the bookkeeping with it
    let outcome = tokio::spawn(async move { routine.run(ctx, api).await }).await;
    let stopped = cancellation.is_cancelled();

    let (status, error_message) = match outcome {
        Ok(Ok(())) if stopped => (PluginExecutionStatus::Stopped, None),
        Ok(Ok(())) => (PluginExecutionStatus::Completed, None),
        Ok(Err(e)) if stopped => (PluginExecutionStatus::Stopped, Some(format!("{e:#}"))),
        Ok(Err(e)) => (PluginExecutionStatus::Failed, Some(format!("{e:#}"))),
        Err(join_error) => {
            let message = if join_error.is_panic() {
                format!("routine panicked: {}", panic_message(join_error.into_panic()))
            } else {
                "routine task was cancelled".to_string()
            };
            let status = if stopped {
                PluginExecutionStatus::Stopped
            } else {
                PluginExecutionStatus::Failed
            };
            (status, Some(message))
        }
    };

    if let Some(mut execution) = executions.get_mut(&execution_id) {
        execution.status = status;
        execution.completed_at = Some(Utc::now());
        execution.error_message = error_message.clone();
    }

    match (&status, &error_message) {
        (PluginExecutionStatus::Failed, Some(error)) => {
            log_error("plugin_coordinator", "run_routine", error, Some(&plugin_name));
        }
        _ => {
            let event = match status {
                PluginExecutionStatus::Stopped => events::PLUGIN_EXECUTION_STOPPED,
                PluginExecutionStatus::Failed => events::PLUGIN_EXECUTION_FAILED,
                _ => events::PLUGIN_EXECUTION_COMPLETED,
            };
            log_plugin_operation(
                event,
                &plugin_name,
                Some(execution_id),
                Some(target_id),
                &status.to_string(),
                error_message.as_deref(),
            );
        }
    }

    done.send_replace(true);
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
