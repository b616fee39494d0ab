#![allow(clippy::doc_markdown)] // Allow technical terms like ML-Agents, PBT in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Runforge Core
//!
//! Run orchestration engine for long-running training jobs.
//!
//! ## Overview
//!
//! A run is an immutably configured training job that is executed as an
//! external OS process, possibly many times (restarts). The engine owns the
//! run lifecycle state machine, supervises each attempt's process, classifies
//! liveness heuristically, and lets automation routines (plugins) drive
//! optimization loops through the same control surface operators use.
//!
//! ## Module Organization
//!
//! - [`state_machine`] - Run lifecycle states, events, guards, and serialized transitions
//! - [`supervisor`] - Process spawning, watching, signalling, ports, and run layout
//! - [`health`] - Read-only stuck/healthy classification of live runs
//! - [`restart`] - New attempts of terminal runs in resume or force mode
//! - [`plugins`] - Plugin registry, routine API, and execution coordinator
//! - [`orchestrator`] - The caller-facing control surface
//! - [`repository`] - Persistence collaborators consumed by the engine
//! - [`config`] - YAML configuration with environment overlays
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use runforge_core::config::ConfigManager;
//! use runforge_core::orchestrator::{CreateRunRequest, RunOrchestrator};
//! use runforge_core::plugins::PluginRegistry;
//! use runforge_core::repository::{InMemoryNoteSink, InMemoryRevisionStore, InMemoryRunRepository};
//! use std::sync::Arc;
//!
//! # async fn example(experiment_id: uuid::Uuid) -> Result<(), Box<dyn std::error::Error>> {
//! runforge_core::logging::init_structured_logging();
//! let config = ConfigManager::load()?.config().clone();
//!
//! let orchestrator = RunOrchestrator::new(
//!     config,
//!     Arc::new(InMemoryRunRepository::new()),
//!     Arc::new(InMemoryRevisionStore::new()),
//!     Arc::new(InMemoryNoteSink::new()),
//!     Arc::new(PluginRegistry::new()),
//! );
//! orchestrator.recover_orphans().await?;
//!
//! let run = orchestrator.launch_run(CreateRunRequest::new(experiment_id)).await?;
//! println!("run {} is {}", run.run_id, run.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod health;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod plugins;
pub mod repository;
pub mod restart;
pub mod state_machine;
pub mod supervisor;

pub use config::{ConfigManager, ConfigurationError, OrchestratorConfig};
pub use error::{OrchestrationError, OrchestrationResult};
pub use health::{HealthMonitor, HealthPolicy};
pub use models::{
    HealthClassification, HealthSample, PluginExecution, PluginExecutionStatus, PluginScope,
    RestartMode, Revision, RevisionDraft, Run, RunId, RunSnapshot, RunStatusReport,
};
pub use orchestrator::{CreateRunRequest, RunOrchestrator};
pub use plugins::{
    routine_fn, CompletionReport, MergeStrategy, PluginApi, PluginContext, PluginCoordinator,
    PluginDescriptor, PluginRegistry, PluginRoutine, RunHandle,
};
pub use repository::{NoteSink, RevisionStore, RunRepository};
pub use restart::RestartController;
pub use state_machine::{RunEvent, RunState, RunStateMachine};
pub use supervisor::{LaunchReceipt, ProcessSupervisor};
