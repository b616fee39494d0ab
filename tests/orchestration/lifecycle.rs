use crate::common::TestEngine;
use runforge_core::orchestrator::CreateRunRequest;
use runforge_core::state_machine::RunState;
use runforge_core::OrchestrationError;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_create_run_freezes_revision_without_spawning() {
    let engine = TestEngine::new().await;

    let run = engine
        .orchestrator
        .create_run(
            engine
                .request("succeed")
                .with_description("baseline sweep")
                .with_cli_flag("seed", json!(42)),
        )
        .await
        .unwrap();

    assert_eq!(run.status, RunState::Created);
    assert_eq!(run.execution_count, 0);
    assert_eq!(run.revision_id, engine.base_revision.revision_id);
    assert_eq!(run.description, "baseline sweep");
    assert!(run.process_id.is_none());
    assert!(!engine.orchestrator.supervisor().is_live(run.run_id));

    let snapshot = run.snapshot();
    assert_eq!(snapshot.trainer_config, engine.base_revision.trainer_config);
    assert_eq!(snapshot.cli_flags["time_scale"], json!(20));
    assert_eq!(snapshot.cli_flags["seed"], json!(42));

    // The on-disk configuration is the frozen trainer config
    let written = std::fs::read_to_string(&run.paths().config_path).unwrap();
    let parsed: serde_json::Value = serde_yaml::from_str(&written).unwrap();
    assert_eq!(parsed, engine.base_revision.trainer_config);
    assert!(run.run_dir().starts_with(engine.workspace()));
}

#[tokio::test]
async fn test_run_succeeds_and_keeps_snapshot() {
    let engine = TestEngine::new().await;
    let launched = engine.launch("succeed").await;
    assert!(launched.status.is_live() || launched.status == RunState::Succeeded);
    assert_eq!(launched.execution_count, 1);

    let finished = engine.wait_for(launched.run_id, RunState::Succeeded).await;
    assert_eq!(finished.exit_code, Some(0));
    assert!(finished.ended_at.is_some());
    assert!(finished.started_at.is_some());
    assert!(finished.failure_reason.is_none());
    assert_eq!(finished.snapshot(), launched.snapshot());
    assert!(finished.command.as_deref().unwrap().contains("--behavior=succeed"));
    assert!(!engine.orchestrator.supervisor().is_live(launched.run_id));
}

#[tokio::test]
async fn test_fast_exit_succeeds_from_starting() {
    let engine = TestEngine::new().await;
    let run = engine.launch("instant").await;

    let finished = engine.wait_for(run.run_id, RunState::Succeeded).await;
    assert_eq!(finished.execution_count, 1);
    assert_eq!(finished.exit_code, Some(0));
}

#[tokio::test]
async fn test_nonzero_exit_fails_run() {
    let engine = TestEngine::new().await;
    let run = engine.launch("fail").await;

    let failed = engine.wait_for(run.run_id, RunState::Failed).await;
    assert_eq!(failed.exit_code, Some(1));
    assert!(failed.failure_reason.as_deref().unwrap().contains("code 1"));

    let logs = engine.orchestrator.logs(run.run_id).await.unwrap();
    assert!(logs.contains("trainer crashed"));
}

#[tokio::test]
async fn test_execute_requires_created_run() {
    let engine = TestEngine::new().await;
    let run = engine.launch("succeed").await;
    engine.wait_for(run.run_id, RunState::Succeeded).await;

    let err = engine.orchestrator.execute(run.run_id).await.unwrap_err();
    assert!(err.is_invalid_transition(), "unexpected error: {err}");

    let unchanged = engine.orchestrator.get_run(run.run_id).await.unwrap();
    assert_eq!(unchanged.status, RunState::Succeeded);
    assert_eq!(unchanged.execution_count, 1);
}

#[tokio::test]
async fn test_unknown_run_is_not_found() {
    let engine = TestEngine::new().await;
    let err = engine.orchestrator.get_run(Uuid::new_v4()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_create_run_rejects_bad_revisions() {
    let engine = TestEngine::new().await;

    let err = engine
        .orchestrator
        .create_run(CreateRunRequest::new(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::NoRevisions(_)));

    let err = engine
        .orchestrator
        .create_run(CreateRunRequest::new(engine.experiment_id).with_revision(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::RevisionNotFound(_)));

    let err = engine
        .orchestrator
        .create_run(CreateRunRequest::new(Uuid::new_v4()).with_revision(engine.base_revision.revision_id))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_logs_carry_attempt_header() {
    let engine = TestEngine::new().await;
    let run = engine.launch("succeed").await;
    engine.wait_for(run.run_id, RunState::Succeeded).await;

    let logs = engine.orchestrator.logs(run.run_id).await.unwrap();
    assert!(logs.contains("=== Training Run ==="));
    assert!(logs.contains(&format!("Run ID: {}", run.run_id)));
    assert!(logs.contains("Attempt: 1"));
    assert!(logs.contains("training complete"));

    let tail = engine.orchestrator.tail_logs(run.run_id, 3).await.unwrap();
    assert!(tail.lines().count() <= 3);
    assert!(!tail.contains("=== Training Run ==="));
}

#[tokio::test]
async fn test_transitions_are_published() {
    let engine = TestEngine::new().await;
    let mut transitions = engine.orchestrator.subscribe();
    let run = engine.launch("succeed").await;
    engine.wait_for(run.run_id, RunState::Succeeded).await;

    let mut seen = Vec::new();
    while let Ok(record) = transitions.try_recv() {
        if record.run_id == run.run_id {
            seen.push(record.to);
        }
    }
    assert_eq!(seen.first(), Some(&RunState::Starting));
    assert_eq!(seen.last(), Some(&RunState::Succeeded));
}
