//! # System Constants
//!
//! Event names, on-disk layout names, and invocation defaults shared by the
//! supervisor, the state machine, and the plugin coordinator.

use std::time::Duration;

// Re-export state types for convenience
pub use crate::state_machine::RunState as RunStatus;

/// Run lifecycle events published on every applied transition
pub mod events {
    pub const RUN_EXECUTE_REQUESTED: &str = "run.execute_requested";
    pub const RUN_RESTART_REQUESTED: &str = "run.restart_requested";
    pub const RUN_PROCESS_SPAWNED: &str = "run.process_spawned";
    pub const RUN_PROCESS_ALIVE: &str = "run.process_alive";
    pub const RUN_PROCESS_EXITED: &str = "run.process_exited";
    pub const RUN_STOPPED: &str = "run.stopped";
    pub const RUN_KILLED: &str = "run.killed";
    pub const RUN_SPAWN_FAILED: &str = "run.spawn_failed";
    pub const RUN_SUPERVISION_LOST: &str = "run.supervision_lost";

    pub const PLUGIN_EXECUTION_STARTED: &str = "plugin.execution_started";
    pub const PLUGIN_EXECUTION_COMPLETED: &str = "plugin.execution_completed";
    pub const PLUGIN_EXECUTION_FAILED: &str = "plugin.execution_failed";
    pub const PLUGIN_EXECUTION_STOPPED: &str = "plugin.execution_stopped";
}

/// Names of the files and directories inside a run directory
pub mod layout {
    /// Parent directory for all run directories under the workspace root
    pub const RUNS_DIR: &str = "runs";
    /// Frozen trainer configuration written at run creation
    pub const CONFIG_FILE: &str = "config.yaml";
    /// Append-only combined stdout/stderr of every attempt
    pub const LOG_FILE: &str = "stdout.log";
    /// Trainer run name; the trainer writes checkpoints to `<run_dir>/<RESULTS_NAME>/`
    pub const RESULTS_NAME: &str = "results";
}

/// Trainer invocation defaults
pub mod invocation {
    pub const DEFAULT_TRAINER_PROGRAM: &str = "mlagents-learn";
    pub const RESUME_FLAG: &str = "--resume";
    pub const FORCE_FLAG: &str = "--force";
    /// CLI flag read to size the port reservation
    pub const NUM_ENVS_FLAG: &str = "num_envs";
}

/// Reason recorded when a supervisor restart finds runs without a live process
pub const ORPHANED_BY_RESTART_REASON: &str = "supervisor restarted while the run was live";

/// Reason recorded when a plugin execution was interrupted by a coordinator restart
pub const PLUGIN_ORPHANED_REASON: &str = "Service was restarted";

/// Upper bound on log lines returned by a single tail request
pub const MAX_TAIL_LINES: usize = 20_000;

/// Capacity of the transition broadcast channel
pub const TRANSITION_CHANNEL_CAPACITY: usize = 1024;

/// Minimum sleep between watcher polls, regardless of configuration
pub const MIN_WATCHER_POLL: Duration = Duration::from_millis(10);
