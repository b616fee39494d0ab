use crate::state_machine::StateMachineError;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while launching, signalling, or watching trainer processes
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to spawn run {run_id}: {reason}")]
    Spawn { run_id: Uuid, reason: String },

    #[error("Trainer executable not found for run {run_id}: {program}")]
    ExecutableNotFound { run_id: Uuid, program: String },

    #[error("Working directory missing for run {run_id}: {}", path.display())]
    WorkingDirectoryMissing { run_id: Uuid, path: PathBuf },

    #[error("Run {run_id} already has a registered process{}", pid.map(|p| format!(" (pid {p})")).unwrap_or_default())]
    AlreadyRunning { run_id: Uuid, pid: Option<u32> },

    #[error("Run {0} has no live process")]
    NotRunning(Uuid),

    #[error("No free port range for {needed} environments starting at {base}")]
    PortsExhausted { base: u16, needed: u16 },

    #[error("Failed to deliver {signal} to process group {pgid}: {reason}")]
    SignalFailed {
        pgid: u32,
        signal: &'static str,
        reason: String,
    },

    #[error("Run {run_id} did not exit {waited_seconds}s after a forced kill")]
    Unresponsive { run_id: Uuid, waited_seconds: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),
}

impl SupervisorError {
    /// Errors that mean no process was started for the attempt
    pub fn is_spawn_failure(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. }
                | Self::ExecutableNotFound { .. }
                | Self::WorkingDirectoryMissing { .. }
                | Self::PortsExhausted { .. }
                | Self::Io(_)
        )
    }
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
