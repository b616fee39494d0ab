use super::policy::{HealthPhase, HealthPolicy};
use crate::models::{HealthClassification, HealthSample, Run};
use crate::state_machine::{RunState, RunStateMachine, StateMachineResult};
use crate::supervisor::{run_log, ProcessSupervisor};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Read-only health sampling for live runs
///
/// Sampling never transitions a run. A stuck classification only authorizes
/// an operator (or an automated policy) to call `force_kill`.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    state_machine: Arc<RunStateMachine>,
    supervisor: ProcessSupervisor,
    policy: HealthPolicy,
}

impl HealthMonitor {
    pub fn new(
        state_machine: Arc<RunStateMachine>,
        supervisor: ProcessSupervisor,
        policy: HealthPolicy,
    ) -> Self {
        Self {
            state_machine,
            supervisor,
            policy,
        }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Sample one run
    pub async fn sample(&self, run_id: Uuid) -> StateMachineResult<HealthSample> {
        let run = self.state_machine.load(run_id).await?;
        Ok(self.sample_run(&run).await)
    }

    async fn sample_run(&self, run: &Run) -> HealthSample {
        let Some(phase) = HealthPhase::for_state(run.status) else {
            return HealthSample::not_applicable(run.run_id, run.status);
        };

        let now = Utc::now();
        let mut sample = HealthSample {
            run_id: run.run_id,
            status: run.status,
            classification: HealthClassification::Indeterminate,
            healthy: false,
            stuck: false,
            reason: String::new(),
            runtime_seconds: run.runtime_seconds(now),
            seconds_since_log_update: None,
            pid: self
                .supervisor
                .live_pid(run.run_id)
                .or(run.process_id),
            log_size_bytes: None,
            sampled_at: now,
        };

        let Some(runtime) = sample.runtime_seconds else {
            sample.reason = "No start time recorded".to_string();
            return sample;
        };

        if !self.supervisor.is_live(run.run_id) {
            sample.reason = "No live process registered for run".to_string();
            return sample;
        }

        match run_log::stat(run.log_path()).await {
            Ok(None) => {
                sample.classification = HealthClassification::Healthy;
                sample.healthy = true;
                sample.reason = "Log file not yet created (early startup)".to_string();
            }
            Ok(Some((size, modified))) => {
                let silence = SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or(Duration::ZERO)
                    .as_secs();
                let verdict = self.policy.classify(phase, runtime, silence);

                sample.log_size_bytes = Some(size);
                sample.seconds_since_log_update = Some(silence);
                sample.stuck = verdict.stuck;
                sample.healthy = !verdict.stuck;
                sample.classification = if verdict.stuck {
                    HealthClassification::Stuck
                } else {
                    HealthClassification::Healthy
                };
                sample.reason = verdict.reason;
            }
            Err(e) => {
                sample.reason = format!("Log file unreadable: {e}");
            }
        }

        sample
    }

    /// Every live run currently classified stuck
    pub async fn stale_runs(&self) -> StateMachineResult<Vec<HealthSample>> {
        let repository = self.state_machine.repository();
        let mut stale = Vec::new();
        for status in [RunState::Starting, RunState::Running] {
            for run in repository.list_by_status(status).await? {
                let sample = self.sample_run(&run).await;
                if sample.stuck {
                    stale.push(sample);
                }
            }
        }
        Ok(stale)
    }

    /// Periodically log stuck runs until `shutdown` is cancelled
    pub fn spawn_sampler(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match monitor.stale_runs().await {
                    Ok(stale) if stale.is_empty() => debug!("🩺 HEALTH: No stuck runs"),
                    Ok(stale) => {
                        for sample in stale {
                            warn!(
                                run_id = %sample.run_id,
                                pid = ?sample.pid,
                                seconds_since_log_update = ?sample.seconds_since_log_update,
                                "🩺 HEALTH: Run appears stuck: {}",
                                sample.reason
                            );
                        }
                    }
                    Err(e) => warn!("🩺 HEALTH: Sampling failed: {e}"),
                }
            }
            debug!("🩺 HEALTH: Sampler stopped");
        })
    }
}
