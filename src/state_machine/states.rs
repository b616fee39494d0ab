use serde::{Deserialize, Serialize};
use std::fmt;

/// Run lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Snapshot exists, no process has ever been spawned
    #[default]
    Created,
    /// Process launched, not yet confirmed responding
    Starting,
    /// Process confirmed alive by the liveness probe
    Running,
    /// Process exited with code 0
    Succeeded,
    /// Process exited non-zero, crashed, failed to spawn, or supervision was lost
    Failed,
    /// Process exited after a graceful stop request
    Stopped,
    /// Process was forcibly terminated
    Killed,
}

impl RunState {
    /// Check if this is a terminal state (process attempt is over)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Stopped | Self::Killed
        )
    }

    /// Check if an attempt is in flight (a process may be live)
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// Check if the state is stable (no transition is expected without a request)
    pub fn is_stable(&self) -> bool {
        matches!(self, Self::Created) || self.is_terminal()
    }

    /// Check if a restart may be requested from this state
    pub fn is_restartable(&self) -> bool {
        self.is_terminal()
    }

    /// Check if this terminal state reflects an operator-initiated termination
    pub fn is_operator_terminated(&self) -> bool {
        matches!(self, Self::Stopped | Self::Killed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Killed => "killed",
        }
    }

    /// All states, in lifecycle order
    pub fn all() -> [RunState; 7] {
        [
            Self::Created,
            Self::Starting,
            Self::Running,
            Self::Succeeded,
            Self::Failed,
            Self::Stopped,
            Self::Killed,
        ]
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            "killed" => Ok(Self::Killed),
            _ => Err(format!("Invalid run state: {s}")),
        }
    }
}
