use crate::common::TestEngine;
use runforge_core::models::Run;
use runforge_core::state_machine::{RunEvent, RunState};

/// A run left `starting` with no supervised process, as after an engine crash
async fn orphaned_run(engine: &TestEngine) -> Run {
    let run = engine
        .orchestrator
        .create_run(engine.request("serve"))
        .await
        .unwrap();
    let outcome = engine
        .orchestrator
        .state_machine()
        .transition(run.run_id, RunEvent::Execute)
        .await
        .unwrap();
    assert_eq!(outcome.state(), RunState::Starting);
    engine.orchestrator.get_run(run.run_id).await.unwrap()
}

#[tokio::test]
async fn test_recover_orphans_fails_unsupervised_runs() {
    let engine = TestEngine::new().await;
    let orphan = orphaned_run(&engine).await;
    let supervised = engine.launch("serve").await;
    engine.wait_for(supervised.run_id, RunState::Running).await;

    let recovered = engine.orchestrator.recover_orphans().await.unwrap();
    assert_eq!(recovered, vec![orphan.run_id]);

    let failed = engine.orchestrator.get_run(orphan.run_id).await.unwrap();
    assert_eq!(failed.status, RunState::Failed);
    assert!(failed
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("supervision lost"));

    let untouched = engine.orchestrator.get_run(supervised.run_id).await.unwrap();
    assert_eq!(untouched.status, RunState::Running);

    // A second pass finds nothing
    assert!(engine.orchestrator.recover_orphans().await.unwrap().is_empty());
    engine.orchestrator.stop(supervised.run_id).await.unwrap();
}

#[tokio::test]
async fn test_stopping_orphan_marks_it_stopped() {
    let engine = TestEngine::new().await;
    let orphan = orphaned_run(&engine).await;

    let state = engine.orchestrator.stop(orphan.run_id).await.unwrap();
    assert_eq!(state, RunState::Stopped);

    let stopped = engine.orchestrator.get_run(orphan.run_id).await.unwrap();
    assert!(stopped.ended_at.is_some());
    assert_eq!(stopped.execution_count, 1);
}

#[tokio::test]
async fn test_force_killing_orphan_marks_it_killed() {
    let engine = TestEngine::new().await;
    let orphan = orphaned_run(&engine).await;

    let state = engine
        .orchestrator
        .force_kill(orphan.run_id, Some("cleanup"))
        .await
        .unwrap();
    assert_eq!(state, RunState::Killed);

    let killed = engine.orchestrator.get_run(orphan.run_id).await.unwrap();
    assert_eq!(killed.failure_reason.as_deref(), Some("cleanup"));
}

#[tokio::test]
async fn test_orphan_can_be_restarted_after_recovery() {
    let engine = TestEngine::new().await;
    let orphan = orphaned_run(&engine).await;
    engine.orchestrator.recover_orphans().await.unwrap();

    engine
        .orchestrator
        .restart(orphan.run_id, runforge_core::models::RestartMode::Resume)
        .await
        .unwrap();
    let running = engine.wait_for(orphan.run_id, RunState::Running).await;
    assert_eq!(running.execution_count, 2);

    engine.orchestrator.stop(orphan.run_id).await.unwrap();
}
