//! # Plugin Execution
//!
//! Automation routines (sweeps, population-based training) that create and
//! await runs through the orchestrator's public control surface.

pub mod api;
pub mod context;
pub mod coordinator;
pub mod errors;
pub mod merge;
pub mod registry;
pub mod routine;

pub use api::{CompletionReport, ExperimentData, PluginApi, RunControl, RunHandle};
pub use context::PluginContext;
pub use coordinator::PluginCoordinator;
pub use errors::{PluginError, PluginResult};
pub use merge::{
    deep_merge, merge_hyperparameters, mutate_numeric, shallow_merge, MergeStrategy, MUTATION_SPREAD,
};
pub use registry::{PluginDescriptor, PluginRegistry, SettingKind, SettingSpec};
pub use routine::{routine_fn, PluginRoutine};
