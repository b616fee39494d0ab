use crate::common::TestEngine;
use anyhow::Context;
use runforge_core::models::{PluginExecutionStatus, PluginScope};
use runforge_core::plugins::{
    routine_fn, PluginDescriptor, PluginRegistry, SettingKind, SettingSpec,
};
use runforge_core::OrchestrationError;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn registry() -> Arc<PluginRegistry> {
    let registry = PluginRegistry::new();

    registry.register(
        PluginDescriptor::new(
            "idle",
            PluginScope::Experiment,
            routine_fn(|ctx, _api| async move {
                ctx.stopped().await;
                Ok(())
            }),
        )
        .with_description("Waits until stopped"),
    );

    registry.register(PluginDescriptor::new(
        "diverging",
        PluginScope::Experiment,
        routine_fn(|_ctx, _api| async move {
            Err(anyhow::anyhow!("objective diverged")).context("evaluating generation 3")
        }),
    ));

    registry.register(
        PluginDescriptor::new(
            "configured",
            PluginScope::Run,
            routine_fn(|ctx, _api| async move {
                anyhow::ensure!(ctx.setting_u64("patience", 0) == 5, "patience not applied");
                Ok(())
            }),
        )
        .with_setting("patience", SettingSpec::required(SettingKind::Int)),
    );

    Arc::new(registry)
}

#[tokio::test]
async fn test_one_active_execution_per_target() {
    let engine = TestEngine::with_registry(registry()).await;
    let plugins = &engine.orchestrator;

    let first = plugins
        .start_plugin("idle", engine.experiment_id, PluginScope::Experiment, json!(null))
        .unwrap();
    assert_eq!(first.settings, json!({}));

    let err = plugins
        .start_plugin("idle", engine.experiment_id, PluginScope::Experiment, json!({}))
        .unwrap_err();
    match err {
        OrchestrationError::PluginAlreadyRunning { execution_id, .. } => {
            assert_eq!(execution_id, first.execution_id)
        }
        other => panic!("expected PluginAlreadyRunning, got {other:?}"),
    }

    // Another target is independent
    let other_target = Uuid::new_v4();
    let second = plugins
        .start_plugin("idle", other_target, PluginScope::Experiment, json!({}))
        .unwrap();

    for execution_id in [first.execution_id, second.execution_id] {
        plugins.stop_plugin(execution_id).unwrap();
        let finished = plugins.plugins().await_execution(execution_id).await.unwrap();
        assert_eq!(finished.status, PluginExecutionStatus::Stopped);
        assert!(finished.stop_requested);
        assert!(finished.completed_at.is_some());
    }

    // A finished execution frees its target; a new record is created
    let again = plugins
        .start_plugin("idle", engine.experiment_id, PluginScope::Experiment, json!({}))
        .unwrap();
    assert_ne!(again.execution_id, first.execution_id);
    assert_eq!(plugins.list_executions(engine.experiment_id, None).len(), 2);

    plugins.stop_plugin(again.execution_id).unwrap();
    plugins.plugins().await_execution(again.execution_id).await.unwrap();
}

#[tokio::test]
async fn test_failed_routine_records_error_chain() {
    let engine = TestEngine::with_registry(registry()).await;

    let execution = engine
        .orchestrator
        .start_plugin("diverging", engine.experiment_id, PluginScope::Experiment, json!({}))
        .unwrap();
    let err = engine
        .orchestrator
        .plugins()
        .await_success(execution.execution_id)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("objective diverged"));

    let record = engine
        .orchestrator
        .get_plugin_execution(execution.execution_id)
        .unwrap();
    assert_eq!(record.status, PluginExecutionStatus::Failed);
    let message = record.error_message.unwrap();
    assert!(message.contains("evaluating generation 3"));
    assert!(message.contains("objective diverged"));
}

#[tokio::test]
async fn test_start_validates_plugin_and_settings() {
    let engine = TestEngine::with_registry(registry()).await;
    let orchestrator = &engine.orchestrator;

    let err = orchestrator
        .start_plugin("missing", engine.experiment_id, PluginScope::Experiment, json!({}))
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::PluginNotFound(name) if name == "missing"));

    let err = orchestrator
        .start_plugin("idle", Uuid::new_v4(), PluginScope::Run, json!({}))
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::PluginScopeMismatch { .. }));

    let run_id = Uuid::new_v4();
    let err = orchestrator
        .start_plugin("configured", run_id, PluginScope::Run, json!({}))
        .unwrap_err();
    assert!(err.to_string().contains("patience"));

    let err = orchestrator
        .start_plugin("configured", run_id, PluginScope::Run, json!({"patience": "five"}))
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::InvalidRequest(_)));

    let err = orchestrator
        .start_plugin("idle", engine.experiment_id, PluginScope::Experiment, json!(5))
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::InvalidRequest(_)));
    assert!(orchestrator.list_executions(engine.experiment_id, None).is_empty());

    // Nothing was recorded for rejected starts
    assert!(orchestrator.list_executions(run_id, None).is_empty());

    let execution = orchestrator
        .start_plugin("configured", run_id, PluginScope::Run, json!({"patience": 5}))
        .unwrap();
    let finished = orchestrator
        .plugins()
        .await_success(execution.execution_id)
        .await
        .unwrap();
    assert_eq!(finished.status, PluginExecutionStatus::Completed);
}

#[tokio::test]
async fn test_unknown_execution_is_not_found() {
    let engine = TestEngine::with_registry(registry()).await;
    let missing = Uuid::new_v4();

    assert!(engine.orchestrator.get_plugin_execution(missing).unwrap_err().is_not_found());
    assert!(matches!(
        engine.orchestrator.stop_plugin(missing),
        Err(OrchestrationError::ExecutionNotFound(id)) if id == missing
    ));
}

#[tokio::test]
async fn test_shutdown_stops_routines() {
    let engine = TestEngine::with_registry(registry()).await;
    let execution = engine
        .orchestrator
        .start_plugin("idle", engine.experiment_id, PluginScope::Experiment, json!({}))
        .unwrap();

    let stopped_runs = engine.orchestrator.shutdown().await;
    assert!(stopped_runs.is_empty());

    let record = engine
        .orchestrator
        .get_plugin_execution(execution.execution_id)
        .unwrap();
    assert_eq!(record.status, PluginExecutionStatus::Stopped);
}
