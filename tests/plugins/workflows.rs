use crate::common::{wait_for_status, TestEngine};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use runforge_core::models::{PluginExecutionStatus, PluginScope};
use runforge_core::plugins::{
    routine_fn, CompletionReport, MergeStrategy, PluginDescriptor, PluginRegistry, RunHandle,
};
use runforge_core::state_machine::RunState;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

type Reports = Arc<Mutex<Vec<(Vec<RunHandle>, CompletionReport)>>>;

fn behavior(name: &str) -> BTreeMap<String, Value> {
    BTreeMap::from([("behavior".to_string(), json!(name))])
}

fn registry(reports: Reports) -> Arc<PluginRegistry> {
    let registry = PluginRegistry::new();

    let sweep_reports = reports.clone();
    registry.register(PluginDescriptor::new(
        "lr_sweep",
        PluginScope::Experiment,
        routine_fn(move |_ctx, api| {
            let reports = sweep_reports.clone();
            async move {
                let mut handles = Vec::new();
                for rate in [0.001, 0.0001] {
                    let mut hyperparameters = Map::new();
                    hyperparameters.insert("learning_rate".to_string(), json!(rate));
                    let revision = api
                        .create_revision_with_hyperparameters(
                            &format!("lr-{rate}"),
                            &hyperparameters,
                            Some("Walker"),
                            "",
                        )
                        .await?;
                    handles.push(
                        api.create_run_from_revision(&revision, behavior("succeed"), "")
                            .await?,
                    );
                }

                let report = api.wait_for_completion(&handles, Duration::from_secs(10)).await?;
                api.add_note(&format!("{} of {} runs succeeded", report.succeeded().len(), handles.len()))
                    .await?;
                api.advance_generation();
                reports.lock().push((handles, report));
                Ok(())
            }
        }),
    ));

    let patient_reports = reports.clone();
    registry.register(PluginDescriptor::new(
        "patient",
        PluginScope::Experiment,
        routine_fn(move |ctx, api| {
            let reports = patient_reports.clone();
            async move {
                let handle = api.create_run(behavior("serve"), "long haul").await?;
                let timeout = Duration::from_millis(ctx.setting_u64("timeout_ms", 200));
                let report = api.wait_for_completion(&[handle], timeout).await?;
                reports.lock().push((vec![handle], report));
                Ok(())
            }
        }),
    ));

    let child_reports = reports;
    registry.register(PluginDescriptor::new(
        "rerun",
        PluginScope::Run,
        routine_fn(move |_ctx, api| {
            let reports = child_reports.clone();
            async move {
                let handle = api.create_run(behavior("instant"), "").await?;
                let report = api.wait_for_completion(&[handle], Duration::from_secs(10)).await?;
                api.add_run_note(&handle, "child of a plugin").await?;
                let tail = api.tail_logs(&handle, 50).await?;
                anyhow::ensure!(tail.iter().any(|line| line.contains("--behavior=instant")));
                reports.lock().push((vec![handle], report));
                Ok(())
            }
        }),
    ));

    registry.register(PluginDescriptor::new(
        "tuner",
        PluginScope::Experiment,
        routine_fn(|_ctx, api| async move {
            api.create_revision_with_config_updates(
                "longer-horizon",
                &json!({"behaviors": {"Walker": {"max_steps": 10}}}),
                MergeStrategy::Deep,
                "longer horizon",
            )
            .await?;
            Ok(())
        }),
    ));

    registry.register(PluginDescriptor::new(
        "population",
        PluginScope::Experiment,
        routine_fn(|_ctx, api| async move {
            let data = api.experiment_data().await?;
            anyhow::ensure!(data.runs.len() == 1, "expected the seeded run");
            anyhow::ensure!(data.revisions.len() == 1, "expected only the base revision");

            anyhow::ensure!(api.mutate_config(&json!({}), 1.5).is_err());
            let parent = &data.revisions[0];
            let mutated = api.mutate_config_with_rng(
                &parent.trainer_config,
                1.0,
                &mut StdRng::seed_from_u64(11),
            )?;
            api.create_revision_with_config_updates("mutant", &mutated, MergeStrategy::Shallow, "")
                .await?;

            anyhow::ensure!(api.experiment_revisions().await?.len() == 2);
            anyhow::ensure!(api.experiment_runs().await?[0].run_id == data.runs[0].run_id);
            Ok(())
        }),
    ));

    Arc::new(registry)
}

async fn wait_until_created(engine: &TestEngine, execution_id: Uuid) -> Vec<Uuid> {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let execution = engine.orchestrator.get_plugin_execution(execution_id).unwrap();
            if !execution.created_runs.is_empty() {
                return execution.created_runs;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("plugin created a run")
}

#[tokio::test]
async fn test_sweep_derives_revisions_and_waits_for_runs() {
    let reports = Reports::default();
    let engine = TestEngine::with_registry(registry(reports.clone())).await;

    let execution = engine
        .orchestrator
        .start_plugin("lr_sweep", engine.experiment_id, PluginScope::Experiment, json!({}))
        .unwrap();
    let finished = engine
        .orchestrator
        .plugins()
        .await_success(execution.execution_id)
        .await
        .unwrap();

    assert_eq!(finished.status, PluginExecutionStatus::Completed);
    assert_eq!(finished.created_runs.len(), 2);
    assert_eq!(finished.generation, 1);

    let (handles, report) = reports.lock().pop().unwrap();
    assert!(report.is_complete());
    assert!(!report.timed_out);
    assert_eq!(report.succeeded().len(), 2);

    for (handle, rate) in handles.iter().zip([0.001, 0.0001]) {
        let run = engine.orchestrator.get_run(handle.run_id).await.unwrap();
        assert_eq!(run.status, RunState::Succeeded);
        assert_eq!(run.description, "Created by lr_sweep");
        assert_eq!(
            run.snapshot().trainer_config["behaviors"]["Walker"]["hyperparameters"]["learning_rate"],
            json!(rate)
        );
        // Untouched hyperparameters survive the merge
        assert_eq!(
            run.snapshot().trainer_config["behaviors"]["Walker"]["hyperparameters"]["batch_size"],
            json!(1024)
        );
    }

    let revisions = engine.revisions.list_for_experiment(engine.experiment_id);
    assert_eq!(revisions.len(), 3);
    assert_eq!(revisions[1].parent_revision_id, Some(engine.base_revision.revision_id));
    assert_eq!(revisions[1].description, "Auto-generated by lr_sweep");

    let notes = engine.notes.notes_for(engine.experiment_id);
    assert_eq!(notes.len(), 1);
    assert!(notes[0].ends_with("lr_sweep: 2 of 2 runs succeeded"));
}

#[tokio::test]
async fn test_completion_wait_times_out_without_error() {
    let reports = Reports::default();
    let engine = TestEngine::with_registry(registry(reports.clone())).await;

    let execution = engine
        .orchestrator
        .start_plugin("patient", engine.experiment_id, PluginScope::Experiment, json!({}))
        .unwrap();
    let finished = engine
        .orchestrator
        .plugins()
        .await_success(execution.execution_id)
        .await
        .unwrap();
    assert_eq!(finished.status, PluginExecutionStatus::Completed);

    let (handles, report) = reports.lock().pop().unwrap();
    assert!(report.timed_out);
    assert!(!report.is_complete());
    assert_eq!(report.pending, vec![handles[0].run_id]);

    // The run outlives the routine
    let run = engine.orchestrator.get_run(handles[0].run_id).await.unwrap();
    assert!(run.status.is_live());
    assert_eq!(run.description, "long haul");
    engine.orchestrator.stop(handles[0].run_id).await.unwrap();
}

#[tokio::test]
async fn test_stop_interrupts_completion_wait() {
    let reports = Reports::default();
    let engine = TestEngine::with_registry(registry(reports.clone())).await;

    let execution = engine
        .orchestrator
        .start_plugin(
            "patient",
            engine.experiment_id,
            PluginScope::Experiment,
            json!({"timeout_ms": 60_000}),
        )
        .unwrap();
    let created = wait_until_created(&engine, execution.execution_id).await;

    engine.orchestrator.stop_plugin(execution.execution_id).unwrap();
    let finished = engine
        .orchestrator
        .plugins()
        .await_execution(execution.execution_id)
        .await
        .unwrap();
    assert_eq!(finished.status, PluginExecutionStatus::Stopped);

    let (_, report) = reports.lock().pop().unwrap();
    assert!(report.cancelled);
    assert!(!report.timed_out);

    // Stopping the routine does not stop its runs
    let run = wait_for_status(&engine.orchestrator, created[0], RunState::Running).await;
    engine.orchestrator.stop(run.run_id).await.unwrap();
}

#[tokio::test]
async fn test_run_scoped_plugin_creates_child_runs() {
    let reports = Reports::default();
    let engine = TestEngine::with_registry(registry(reports.clone())).await;
    let parent = engine.launch("instant").await;
    engine.wait_for(parent.run_id, RunState::Succeeded).await;

    let execution = engine
        .orchestrator
        .start_plugin("rerun", parent.run_id, PluginScope::Run, json!({}))
        .unwrap();
    engine
        .orchestrator
        .plugins()
        .await_success(execution.execution_id)
        .await
        .unwrap();

    let (handles, report) = reports.lock().pop().unwrap();
    assert!(report.is_complete());

    let child = engine.orchestrator.get_run(handles[0].run_id).await.unwrap();
    assert_eq!(child.parent_run_id, Some(parent.run_id));
    assert_eq!(child.revision_id, parent.revision_id);
    assert_eq!(child.experiment_id, engine.experiment_id);

    let notes = engine.notes.notes_for(child.run_id);
    assert!(notes[0].contains("rerun: child of a plugin"));
    assert_eq!(
        engine
            .orchestrator
            .list_executions(parent.run_id, Some(PluginScope::Run))
            .len(),
        1
    );
}

#[tokio::test]
async fn test_config_updates_derive_from_latest_revision() {
    let engine = TestEngine::with_registry(registry(Reports::default())).await;

    let execution = engine
        .orchestrator
        .start_plugin("tuner", engine.experiment_id, PluginScope::Experiment, json!({}))
        .unwrap();
    engine
        .orchestrator
        .plugins()
        .await_success(execution.execution_id)
        .await
        .unwrap();

    let revisions = engine.revisions.list_for_experiment(engine.experiment_id);
    let derived = revisions.last().unwrap();
    assert_eq!(derived.name, "longer-horizon");
    assert_eq!(derived.description, "longer horizon");
    assert_eq!(derived.trainer_config["behaviors"]["Walker"]["max_steps"], json!(10));
    assert_eq!(
        derived.trainer_config["behaviors"]["Walker"]["trainer_type"],
        json!("ppo")
    );
    assert_eq!(derived.environment_path, engine.base_revision.environment_path);
}

#[tokio::test]
async fn test_population_step_mutates_from_experiment_history() {
    let engine = TestEngine::with_registry(registry(Reports::default())).await;
    let seeded = engine.launch("instant").await;
    engine.wait_for(seeded.run_id, RunState::Succeeded).await;

    let execution = engine
        .orchestrator
        .start_plugin("population", engine.experiment_id, PluginScope::Experiment, json!({}))
        .unwrap();
    engine
        .orchestrator
        .plugins()
        .await_success(execution.execution_id)
        .await
        .unwrap();

    let revisions = engine.revisions.list_for_experiment(engine.experiment_id);
    let mutant = revisions.last().unwrap();
    assert_eq!(mutant.name, "mutant");
    assert_eq!(mutant.parent_revision_id, Some(engine.base_revision.revision_id));

    let hyperparameters = &mutant.trainer_config["behaviors"]["Walker"]["hyperparameters"];
    let learning_rate = hyperparameters["learning_rate"].as_f64().unwrap();
    assert!((0.0003 * 0.8..=0.0003 * 1.2).contains(&learning_rate));
    assert!(hyperparameters["batch_size"].is_i64());
    assert_eq!(mutant.trainer_config["behaviors"]["Walker"]["trainer_type"], json!("ppo"));

    let runs = engine.orchestrator.list_runs(engine.experiment_id).await.unwrap();
    assert_eq!(runs.len(), 1);
}
