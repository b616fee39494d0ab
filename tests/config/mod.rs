use crate::common::{write_fake_trainer, TestEngine};
use runforge_core::config::{ConfigManager, ConfigurationError};
use runforge_core::repository::{InMemoryNoteSink, InMemoryRunRepository, RevisionStore};
use runforge_core::state_machine::RunState;
use runforge_core::{PluginRegistry, RunOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn shipped_config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

fn no_env(_: &str) -> Option<String> {
    None
}

#[test]
fn test_shipped_configuration_loads_for_every_environment() {
    for environment in ["development", "test", "production"] {
        let manager =
            ConfigManager::load_with_overrides(Some(shipped_config_dir()), environment, no_env)
                .unwrap_or_else(|e| panic!("{environment}: {e}"));
        assert_eq!(manager.environment(), environment);
        assert_eq!(manager.config().environment, environment);
    }
}

#[test]
fn test_test_overlay_shortens_timings() {
    let manager = ConfigManager::load_with_overrides(Some(shipped_config_dir()), "test", no_env).unwrap();
    let config = manager.config();

    assert!(config.is_test_environment());
    assert_eq!(config.supervisor.stop_grace_period(), Duration::from_secs(2));
    assert_eq!(config.supervisor.liveness.initial_delay(), Duration::from_millis(50));
    assert_eq!(config.plugins.completion_poll_interval(), Duration::from_millis(20));
    // Values the overlay leaves alone come from the base file
    assert_eq!(config.supervisor.trainer_program, "mlagents-learn");
    assert_eq!(config.health.steady_silence_threshold_seconds, 120);
}

#[test]
fn test_production_overlay_enables_ceiling_and_log_dir() {
    let manager =
        ConfigManager::load_with_overrides(Some(shipped_config_dir()), "production", no_env).unwrap();
    let config = manager.config();

    assert_eq!(config.supervisor.supervision_ceiling(), Some(Duration::from_secs(604_800)));
    assert!(config.supervisor.liveness.require_log_output);
    assert_eq!(config.logging.directory, Some(PathBuf::from("/var/log/runforge")));
    assert_eq!(config.runs_root(), PathBuf::from("/var/lib/runforge/runs"));
}

#[test]
fn test_malformed_overlay_is_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("orchestrator.yaml"), "supervisor:\n  kill_wait_seconds: 5\n").unwrap();
    std::fs::create_dir_all(dir.path().join("environments")).unwrap();
    std::fs::write(dir.path().join("environments/test.yaml"), "supervisor: [1, 2\n").unwrap();

    let err = ConfigManager::load_with_overrides(Some(dir.path().to_path_buf()), "test", no_env)
        .unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidYaml { .. }));
}

#[tokio::test]
async fn test_loaded_configuration_drives_orchestrator() {
    let dir = TempDir::new().unwrap();
    let trainer = write_fake_trainer(dir.path());
    let workspace = dir.path().join("loaded-ws");
    let manager = ConfigManager::load_with_overrides(Some(shipped_config_dir()), "test", |key| {
        match key {
            "RUNFORGE_WORKSPACE_ROOT" => Some(workspace.display().to_string()),
            "RUNFORGE_TRAINER_PROGRAM" => Some(trainer.display().to_string()),
            _ => None,
        }
    })
    .unwrap();

    // Reuse the harness revision store seeding
    let seeded = TestEngine::new().await;
    let orchestrator = RunOrchestrator::new(
        manager.config().clone(),
        Arc::new(InMemoryRunRepository::new()),
        seeded.revisions.clone(),
        Arc::new(InMemoryNoteSink::new()),
        Arc::new(PluginRegistry::new()),
    );

    let latest = seeded
        .revisions
        .latest_revision(seeded.experiment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.revision_id, seeded.base_revision.revision_id);

    let run = orchestrator
        .launch_run(seeded.request("instant"))
        .await
        .unwrap();
    assert!(run.run_dir().starts_with(workspace.join("runs")));
    assert_eq!(run.snapshot().trainer_program, trainer.display().to_string());

    let finished = crate::common::wait_for_status(&orchestrator, run.run_id, RunState::Succeeded).await;
    assert_eq!(finished.exit_code, Some(0));
}
