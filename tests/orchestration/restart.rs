use crate::common::TestEngine;
use runforge_core::models::RestartMode;
use runforge_core::state_machine::RunState;

#[tokio::test]
async fn test_resume_restart_reuses_snapshot() {
    let engine = TestEngine::new().await;
    let run = engine.launch("fail").await;
    let failed = engine.wait_for(run.run_id, RunState::Failed).await;

    let receipt = engine
        .orchestrator
        .restart(run.run_id, RestartMode::Resume)
        .await
        .unwrap();
    assert_eq!(receipt.attempt, 2);
    assert!(receipt.command.ends_with("--resume"));

    let second = engine.wait_for(run.run_id, RunState::Failed).await;
    assert_eq!(second.execution_count, 2);
    assert_eq!(second.last_restart_mode, Some(RestartMode::Resume));
    assert!(second.last_restarted_at.is_some());
    assert_eq!(second.snapshot(), failed.snapshot());
    assert_eq!(second.paths(), failed.paths());

    // Both attempts append to the same log
    let logs = engine.orchestrator.logs(run.run_id).await.unwrap();
    assert!(logs.contains("Attempt: 1"));
    assert!(logs.contains("Attempt: 2"));
    assert_eq!(logs.matches("=== Training Run ===").count(), 2);
}

#[tokio::test]
async fn test_force_restart_of_stopped_run() {
    let engine = TestEngine::new().await;
    let run = engine.launch("serve").await;
    engine.wait_for(run.run_id, RunState::Running).await;
    engine.orchestrator.stop(run.run_id).await.unwrap();

    let receipt = engine
        .orchestrator
        .restart(run.run_id, RestartMode::Force)
        .await
        .unwrap();
    assert!(receipt.command.ends_with("--force"));

    let restarted = engine.wait_for(run.run_id, RunState::Running).await;
    assert_eq!(restarted.execution_count, 2);
    assert_eq!(restarted.last_restart_mode, Some(RestartMode::Force));
    assert!(restarted.ended_at.is_none());
    assert!(restarted.exit_code.is_none());

    engine.orchestrator.force_kill(run.run_id, None).await.unwrap();
}

#[tokio::test]
async fn test_restart_rejects_live_run() {
    let engine = TestEngine::new().await;
    let run = engine.launch("serve").await;
    engine.wait_for(run.run_id, RunState::Running).await;

    let err = engine
        .orchestrator
        .restart(run.run_id, RestartMode::Resume)
        .await
        .unwrap_err();
    assert!(err.is_invalid_transition());

    let current = engine.orchestrator.get_run(run.run_id).await.unwrap();
    assert_eq!(current.execution_count, 1);

    engine.orchestrator.stop(run.run_id).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_restarts_admit_one_attempt() {
    let engine = TestEngine::new().await;
    let run = engine.launch("fail").await;
    engine.wait_for(run.run_id, RunState::Failed).await;

    let (first, second) = tokio::join!(
        engine.orchestrator.restart(run.run_id, RestartMode::Resume),
        engine.orchestrator.restart(run.run_id, RestartMode::Resume),
    );
    let admitted = [first.is_ok(), second.is_ok()]
        .iter()
        .filter(|ok| **ok)
        .count();
    assert_eq!(admitted, 1);

    let finished = engine.wait_for(run.run_id, RunState::Failed).await;
    assert_eq!(finished.execution_count, 2);
}

#[tokio::test]
async fn test_execution_count_tracks_repeated_restarts() {
    let engine = TestEngine::new().await;
    let run = engine.launch("fail").await;
    let first = engine.wait_for(run.run_id, RunState::Failed).await;
    assert_eq!(first.execution_count, 1);

    for restarts in 1..=3u32 {
        let receipt = engine
            .orchestrator
            .restart(run.run_id, RestartMode::Resume)
            .await
            .unwrap();
        assert_eq!(receipt.attempt, restarts + 1);

        let finished = engine.wait_for(run.run_id, RunState::Failed).await;
        assert_eq!(finished.execution_count, restarts + 1);
        assert_eq!(finished.snapshot(), first.snapshot());
    }

    let logs = engine.orchestrator.logs(run.run_id).await.unwrap();
    assert_eq!(logs.matches("=== Training Run ===").count(), 4);
}
