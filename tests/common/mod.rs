//! Shared harness for integration tests
//!
//! Every engine gets its own temporary workspace and a `/bin/sh` fake
//! trainer. The trainer's behavior is picked per run with the `behavior`
//! CLI flag, which reaches the script as `--behavior=<name>`.

#![allow(dead_code)]

use runforge_core::config::OrchestratorConfig;
use runforge_core::models::{Revision, RevisionDraft, Run};
use runforge_core::orchestrator::{CreateRunRequest, RunOrchestrator};
use runforge_core::plugins::PluginRegistry;
use runforge_core::repository::{
    InMemoryNoteSink, InMemoryRevisionStore, InMemoryRunRepository, RevisionStore,
};
use runforge_core::state_machine::RunState;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

const FAKE_TRAINER: &str = r#"#!/bin/sh
behavior=succeed
for arg in "$@"; do
  case "$arg" in
    --behavior=*) behavior="${arg#--behavior=}" ;;
  esac
done
echo "trainer started: $*"
case "$behavior" in
  succeed)
    sleep 0.3
    echo "training complete"
    exit 0
    ;;
  instant)
    exit 0
    ;;
  fail)
    sleep 0.3
    echo "trainer crashed" >&2
    exit 1
    ;;
  serve)
    trap 'echo "received TERM"; exit 0' TERM
    while true; do sleep 0.1; done
    ;;
  stubborn)
    trap '' TERM
    while true; do sleep 1; done
    ;;
esac
"#;

/// Default upper bound for waiting on a state
pub const STATE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TestEngine {
    pub orchestrator: RunOrchestrator,
    pub runs: Arc<InMemoryRunRepository>,
    pub revisions: Arc<InMemoryRevisionStore>,
    pub notes: Arc<InMemoryNoteSink>,
    pub registry: Arc<PluginRegistry>,
    pub experiment_id: Uuid,
    pub base_revision: Revision,
    workspace: TempDir,
}

impl TestEngine {
    pub async fn new() -> Self {
        Self::with_registry(Arc::new(PluginRegistry::new())).await
    }

    pub async fn with_registry(registry: Arc<PluginRegistry>) -> Self {
        Self::build(registry, |_| {}).await
    }

    /// Engine whose configuration is adjusted after the test defaults
    pub async fn with_config(tweak: impl FnOnce(&mut OrchestratorConfig)) -> Self {
        Self::build(Arc::new(PluginRegistry::new()), tweak).await
    }

    async fn build(registry: Arc<PluginRegistry>, tweak: impl FnOnce(&mut OrchestratorConfig)) -> Self {
        let workspace = TempDir::new().expect("create workspace");
        let trainer = write_fake_trainer(workspace.path());
        let mut config = test_config(workspace.path(), &trainer);
        tweak(&mut config);

        let runs = Arc::new(InMemoryRunRepository::new());
        let revisions = Arc::new(InMemoryRevisionStore::new());
        let notes = Arc::new(InMemoryNoteSink::new());

        let experiment_id = Uuid::new_v4();
        let base_revision = revisions
            .create_revision(base_draft(experiment_id))
            .await
            .expect("seed base revision");

        let orchestrator = RunOrchestrator::new(
            config,
            runs.clone(),
            revisions.clone(),
            notes.clone(),
            registry.clone(),
        );

        Self {
            orchestrator,
            runs,
            revisions,
            notes,
            registry,
            experiment_id,
            base_revision,
            workspace,
        }
    }

    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    pub fn request(&self, behavior: &str) -> CreateRunRequest {
        CreateRunRequest::new(self.experiment_id).with_cli_flag("behavior", json!(behavior))
    }

    /// Create and start a run with the given trainer behavior
    pub async fn launch(&self, behavior: &str) -> Run {
        self.orchestrator
            .launch_run(self.request(behavior))
            .await
            .expect("launch run")
    }

    pub async fn wait_for(&self, run_id: Uuid, expected: RunState) -> Run {
        wait_for_status(&self.orchestrator, run_id, expected).await
    }
}

pub fn base_draft(experiment_id: Uuid) -> RevisionDraft {
    RevisionDraft::new(
        experiment_id,
        "baseline",
        json!({
            "behaviors": {
                "Walker": {
                    "trainer_type": "ppo",
                    "hyperparameters": {"learning_rate": 0.0003, "batch_size": 1024},
                    "max_steps": 500000
                }
            }
        }),
    )
    .with_environment("/opt/envs/Walker")
    .with_cli_flag("time_scale", json!(20))
}

pub fn write_fake_trainer(dir: &Path) -> PathBuf {
    let path = dir.join("fake-trainer.sh");
    std::fs::write(&path, FAKE_TRAINER).expect("write fake trainer");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("make fake trainer executable");
    }
    path
}

/// Fast-cycling configuration rooted in `workspace`
pub fn test_config(workspace: &Path, trainer: &Path) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.environment = "test".to_string();
    config.workspace.root = workspace.join("ws");
    config.supervisor.trainer_program = trainer.display().to_string();
    config.supervisor.stop_grace_period_seconds = 2;
    config.supervisor.kill_wait_seconds = 3;
    config.supervisor.liveness.initial_delay_ms = 50;
    config.supervisor.liveness.poll_interval_ms = 20;
    config.plugins.completion_poll_interval_ms = 20;
    config
}

pub async fn wait_for_status(orchestrator: &RunOrchestrator, run_id: Uuid, expected: RunState) -> Run {
    let polled = tokio::time::timeout(STATE_TIMEOUT, async {
        loop {
            let run = orchestrator.get_run(run_id).await.expect("run exists");
            if run.status == expected {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    match polled {
        Ok(run) => run,
        Err(_) => {
            let current = orchestrator.get_run(run_id).await.expect("run exists");
            panic!("run {run_id} never reached {expected}; still {}", current.status)
        }
    }
}

pub async fn wait_for_terminal(orchestrator: &RunOrchestrator, run_id: Uuid) -> Run {
    let polled = tokio::time::timeout(STATE_TIMEOUT, async {
        loop {
            let run = orchestrator.get_run(run_id).await.expect("run exists");
            if run.status.is_terminal() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    polled.unwrap_or_else(|_| panic!("run {run_id} never finished"))
}
