use crate::common::TestEngine;
use runforge_core::state_machine::RunState;
use std::time::Duration;

#[tokio::test]
async fn test_ceiling_keeps_observed_process_running() {
    let engine = TestEngine::with_config(|config| {
        config.supervisor.supervision_ceiling_seconds = Some(1);
    })
    .await;
    let run = engine.launch("serve").await;
    engine.wait_for(run.run_id, RunState::Running).await;

    // Two ceiling periods pass while the process is alive and observable
    tokio::time::sleep(Duration::from_millis(2_500)).await;

    let current = engine.orchestrator.get_run(run.run_id).await.unwrap();
    assert_eq!(current.status, RunState::Running);
    assert!(current.failure_reason.is_none());
    assert!(engine.orchestrator.supervisor().is_live(run.run_id));

    let state = engine.orchestrator.stop(run.run_id).await.unwrap();
    assert_eq!(state, RunState::Stopped);
}

#[tokio::test]
async fn test_exit_after_ceiling_is_classified_normally() {
    let engine = TestEngine::with_config(|config| {
        config.supervisor.supervision_ceiling_seconds = Some(1);
    })
    .await;
    let run = engine.launch("serve").await;
    engine.wait_for(run.run_id, RunState::Running).await;
    tokio::time::sleep(Duration::from_millis(1_300)).await;

    let state = engine
        .orchestrator
        .force_kill(run.run_id, Some("operator"))
        .await
        .unwrap();
    assert_eq!(state, RunState::Killed);

    let killed = engine.orchestrator.get_run(run.run_id).await.unwrap();
    assert_eq!(killed.failure_reason.as_deref(), Some("operator"));
}
