use crate::common::TestEngine;
use runforge_core::state_machine::RunState;
use std::time::Duration;

#[tokio::test]
async fn test_graceful_stop_ends_stopped() {
    let engine = TestEngine::new().await;
    let run = engine.launch("serve").await;
    engine.wait_for(run.run_id, RunState::Running).await;

    let state = engine.orchestrator.stop(run.run_id).await.unwrap();
    assert_eq!(state, RunState::Stopped);

    let stopped = engine.orchestrator.get_run(run.run_id).await.unwrap();
    assert_eq!(stopped.status, RunState::Stopped);
    assert!(stopped.ended_at.is_some());
    assert!(!engine.orchestrator.supervisor().is_live(run.run_id));

    let logs = engine.orchestrator.logs(run.run_id).await.unwrap();
    assert!(logs.contains("received TERM"));
}

#[tokio::test]
async fn test_stop_escalates_when_term_is_ignored() {
    let engine = TestEngine::new().await;
    let run = engine.launch("stubborn").await;
    engine.wait_for(run.run_id, RunState::Running).await;

    let state = engine
        .orchestrator
        .stop_with_timeout(run.run_id, Duration::from_millis(300))
        .await
        .unwrap();
    assert_eq!(state, RunState::Killed);

    let killed = engine.orchestrator.get_run(run.run_id).await.unwrap();
    assert_eq!(killed.status, RunState::Killed);
    assert!(killed.failure_reason.is_some());
    assert!(!engine.orchestrator.supervisor().is_live(run.run_id));
}

#[tokio::test]
async fn test_force_kill_records_reason() {
    let engine = TestEngine::new().await;
    let run = engine.launch("serve").await;
    engine.wait_for(run.run_id, RunState::Running).await;

    let state = engine
        .orchestrator
        .force_kill(run.run_id, Some("diverged"))
        .await
        .unwrap();
    assert_eq!(state, RunState::Killed);

    let killed = engine.orchestrator.get_run(run.run_id).await.unwrap();
    assert_eq!(killed.failure_reason.as_deref(), Some("diverged"));
}

#[tokio::test]
async fn test_stop_rejects_finished_run() {
    let engine = TestEngine::new().await;
    let run = engine.launch("succeed").await;
    engine.wait_for(run.run_id, RunState::Succeeded).await;

    let err = engine.orchestrator.stop(run.run_id).await.unwrap_err();
    assert!(err.is_invalid_transition());

    let err = engine.orchestrator.force_kill(run.run_id, None).await.unwrap_err();
    assert!(err.is_invalid_transition());

    let run = engine.orchestrator.get_run(run.run_id).await.unwrap();
    assert_eq!(run.status, RunState::Succeeded);
}

#[tokio::test]
async fn test_stop_rejects_created_run() {
    let engine = TestEngine::new().await;
    let run = engine
        .orchestrator
        .create_run(engine.request("serve"))
        .await
        .unwrap();

    let err = engine.orchestrator.stop(run.run_id).await.unwrap_err();
    assert!(err.is_invalid_transition());
}

#[tokio::test]
async fn test_shutdown_stops_every_live_run() {
    let engine = TestEngine::new().await;
    let first = engine.launch("serve").await;
    let second = engine.launch("serve").await;
    engine.wait_for(first.run_id, RunState::Running).await;
    engine.wait_for(second.run_id, RunState::Running).await;

    let results = engine.orchestrator.shutdown().await;
    assert_eq!(results.len(), 2);
    for (run_id, outcome) in results {
        assert_eq!(outcome.unwrap(), RunState::Stopped, "run {run_id}");
    }
    assert!(engine.orchestrator.supervisor().registry().is_empty());
}
