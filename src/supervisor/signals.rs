//! Process-group signal delivery
//!
//! Trainers are spawned as process-group leaders so environment worker
//! processes they fork are signalled together with them.

use super::errors::{SupervisorError, SupervisorResult};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// Cooperative shutdown request (SIGTERM)
    Terminate,
    /// Unconditional termination (SIGKILL)
    Kill,
}

impl TerminationSignal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Terminate => "TERM",
            Self::Kill => "KILL",
        }
    }
}

/// Deliver `signal` to every process in the group led by `pgid`
///
/// A group that no longer exists is treated as delivered.
#[cfg(unix)]
pub async fn signal_process_group(pgid: u32, signal: TerminationSignal) -> SupervisorResult<()> {
    let output = kill_command(pgid, signal)
        .output()
        .await
        .map_err(|e| SupervisorError::SignalFailed {
            pgid,
            signal: signal.name(),
            reason: e.to_string(),
        })?;

    if output.status.success() {
        debug!(pgid, signal = signal.name(), "📨 SIGNAL: Delivered to process group");
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.to_ascii_lowercase().contains(NO_SUCH_PROCESS) {
        debug!(pgid, signal = signal.name(), "📨 SIGNAL: Process group already gone");
        return Ok(());
    }
    Err(SupervisorError::SignalFailed {
        pgid,
        signal: signal.name(),
        reason: stderr.trim().to_string(),
    })
}

/// ESRCH text as printed under the C locale
#[cfg(unix)]
const NO_SUCH_PROCESS: &str = "no such process";

/// `kill` pinned to the C locale so a vanished group is recognisable
#[cfg(unix)]
fn kill_command(pgid: u32, signal: TerminationSignal) -> tokio::process::Command {
    let mut command = tokio::process::Command::new("kill");
    command
        .arg("-s")
        .arg(signal.name())
        .arg("--")
        .arg(format!("-{pgid}"))
        .env("LC_ALL", "C")
        .env("LANG", "C")
        .env_remove("LANGUAGE")
        .kill_on_drop(true);
    command
}

#[cfg(not(unix))]
pub async fn signal_process_group(pgid: u32, signal: TerminationSignal) -> SupervisorResult<()> {
    Err(SupervisorError::SignalFailed {
        pgid,
        signal: signal.name(),
        reason: "process groups are not supported on this platform".to_string(),
    })
}
