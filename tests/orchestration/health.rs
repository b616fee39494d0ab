use crate::common::TestEngine;
use runforge_core::models::HealthClassification;
use runforge_core::state_machine::{RunEvent, RunState};
use std::time::Duration;

#[tokio::test]
async fn test_young_run_is_healthy() {
    let engine = TestEngine::new().await;
    let run = engine.launch("serve").await;
    engine.wait_for(run.run_id, RunState::Running).await;

    let sample = engine.orchestrator.health(run.run_id).await.unwrap();
    assert_eq!(sample.classification, HealthClassification::Healthy);
    assert!(sample.healthy);
    assert!(!sample.stuck);
    assert!(sample.pid.is_some());
    assert!(sample.log_size_bytes.unwrap() > 0);
    assert!(sample.reason.contains("grace period"));

    assert!(engine.orchestrator.stale_runs().await.unwrap().is_empty());
    engine.orchestrator.stop(run.run_id).await.unwrap();
}

#[tokio::test]
async fn test_finished_run_is_not_applicable() {
    let engine = TestEngine::new().await;
    let run = engine.launch("instant").await;
    engine.wait_for(run.run_id, RunState::Succeeded).await;

    let sample = engine.orchestrator.health(run.run_id).await.unwrap();
    assert_eq!(sample.classification, HealthClassification::NotApplicable);
    assert!(!sample.stuck);
    assert!(!sample.healthy);
}

#[tokio::test]
async fn test_unsupervised_run_is_indeterminate() {
    let engine = TestEngine::new().await;
    let run = engine
        .orchestrator
        .create_run(engine.request("serve"))
        .await
        .unwrap();
    engine
        .orchestrator
        .state_machine()
        .transition(run.run_id, RunEvent::Execute)
        .await
        .unwrap();

    let sample = engine.orchestrator.health(run.run_id).await.unwrap();
    assert_eq!(sample.classification, HealthClassification::Indeterminate);
    assert!(!sample.stuck);

    // Sampling never changes the run
    let run = engine.orchestrator.get_run(run.run_id).await.unwrap();
    assert_eq!(run.status, RunState::Starting);
}

#[tokio::test]
async fn test_silent_run_is_reported_stuck() {
    let engine = TestEngine::with_config(|config| {
        config.health.min_grace_period_seconds = 0;
        config.health.steady_silence_threshold_seconds = 1;
        config.health.startup_silence_threshold_seconds = 2;
    })
    .await;
    let run = engine.launch("stubborn").await;
    engine.wait_for(run.run_id, RunState::Running).await;

    tokio::time::sleep(Duration::from_millis(3_200)).await;

    let sample = engine.orchestrator.health(run.run_id).await.unwrap();
    assert_eq!(sample.classification, HealthClassification::Stuck);
    assert!(sample.stuck);
    assert!(sample.seconds_since_log_update.unwrap() >= 2);

    let stale = engine.orchestrator.stale_runs().await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].run_id, run.run_id);

    // Still running; only an explicit kill ends it
    assert_eq!(
        engine.orchestrator.get_run(run.run_id).await.unwrap().status,
        RunState::Running
    );
    let state = engine.orchestrator.force_kill(run.run_id, None).await.unwrap();
    assert_eq!(state, RunState::Killed);
}
