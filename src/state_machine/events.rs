use crate::constants::events;
use crate::models::RestartMode;
use serde::{Deserialize, Serialize};

/// Events that can trigger run state transitions
///
/// Requests (`Execute`, `Restart`) come from callers. Everything else is a
/// report about a specific attempt, emitted by the process supervisor; reports
/// carry the attempt number so duplicates and late arrivals can be collapsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RunEvent {
    /// Start the first attempt of a created run
    Execute,
    /// Begin a new attempt of a finished run
    Restart { mode: RestartMode },
    /// The process for an attempt was spawned
    Spawned {
        attempt: u32,
        pid: u32,
        command: String,
    },
    /// The liveness probe confirmed the process is responding
    ProcessAlive { attempt: u32 },
    /// The process exited on its own
    ProcessExited {
        attempt: u32,
        exit_code: Option<i32>,
        signal: Option<i32>,
    },
    /// The process exited after a graceful stop request
    Stopped { attempt: u32, exit_code: Option<i32> },
    /// The process was forcibly terminated
    Killed { attempt: u32, reason: String },
    /// The process could not be launched
    SpawnFailed { attempt: u32, reason: String },
    /// The supervisor could not confirm how the attempt ended
    SupervisionLost { attempt: u32, reason: String },
}

impl RunEvent {
    /// Get the published event name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Execute => events::RUN_EXECUTE_REQUESTED,
            Self::Restart { .. } => events::RUN_RESTART_REQUESTED,
            Self::Spawned { .. } => events::RUN_PROCESS_SPAWNED,
            Self::ProcessAlive { .. } => events::RUN_PROCESS_ALIVE,
            Self::ProcessExited { .. } => events::RUN_PROCESS_EXITED,
            Self::Stopped { .. } => events::RUN_STOPPED,
            Self::Killed { .. } => events::RUN_KILLED,
            Self::SpawnFailed { .. } => events::RUN_SPAWN_FAILED,
            Self::SupervisionLost { .. } => events::RUN_SUPERVISION_LOST,
        }
    }

    /// Short operation name used in rejection messages
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Restart { .. } => "restart",
            Self::Spawned { .. } => "record_spawn",
            Self::ProcessAlive { .. } => "mark_running",
            Self::ProcessExited { .. } => "record_exit",
            Self::Stopped { .. } => "stop",
            Self::Killed { .. } => "kill",
            Self::SpawnFailed { .. } => "record_spawn_failure",
            Self::SupervisionLost { .. } => "record_supervision_lost",
        }
    }

    /// Attempt this event reports on, if it is a supervisor report
    pub fn attempt(&self) -> Option<u32> {
        match self {
            Self::Execute | Self::Restart { .. } => None,
            Self::Spawned { attempt, .. }
            | Self::ProcessAlive { attempt }
            | Self::ProcessExited { attempt, .. }
            | Self::Stopped { attempt, .. }
            | Self::Killed { attempt, .. }
            | Self::SpawnFailed { attempt, .. }
            | Self::SupervisionLost { attempt, .. } => Some(*attempt),
        }
    }

    /// Check if this event begins a new attempt
    pub fn begins_attempt(&self) -> bool {
        matches!(self, Self::Execute | Self::Restart { .. })
    }

    /// Check if this event ends an attempt
    pub fn ends_attempt(&self) -> bool {
        matches!(
            self,
            Self::ProcessExited { .. }
                | Self::Stopped { .. }
                | Self::Killed { .. }
                | Self::SpawnFailed { .. }
                | Self::SupervisionLost { .. }
        )
    }

    /// Failure reason carried by the event, if any
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Self::ProcessExited {
                exit_code: Some(code),
                ..
            } if *code != 0 => Some(format!("process exited with code {code}")),
            Self::ProcessExited {
                signal: Some(signal),
                ..
            } => Some(format!("process terminated by signal {signal}")),
            Self::ProcessExited {
                exit_code: None,
                signal: None,
                ..
            } => Some("process exited without an exit code".to_string()),
            Self::Killed { reason, .. } => Some(reason.clone()),
            Self::SpawnFailed { reason, .. } => Some(format!("spawn failed: {reason}")),
            Self::SupervisionLost { reason, .. } => Some(format!("supervision lost: {reason}")),
            _ => None,
        }
    }

    /// Exit code carried by the event, if any
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ProcessExited { exit_code, .. } | Self::Stopped { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}
