pub mod health;
pub mod plugin_execution;
pub mod revision;
pub mod run;

/// Opaque run identity
pub type RunId = uuid::Uuid;

// Re-export core models for easy access
pub use health::{HealthClassification, HealthSample};
pub use plugin_execution::{PluginExecution, PluginExecutionStatus, PluginScope};
pub use revision::{Revision, RevisionDraft};
pub use run::{LaunchMode, RestartMode, Run, RunPaths, RunSnapshot, RunStatusReport};
