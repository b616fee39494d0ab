use super::errors::{SupervisorError, SupervisorResult};
use super::invocation::InvocationBuilder;
use super::ports::PortAllocator;
use super::registry::{LiveProcess, ProcessRegistry};
use super::run_log;
use super::signals::{signal_process_group, TerminationSignal};
use super::watcher::AttemptWatcher;
use crate::config::SupervisorConfig;
use crate::logging::{log_error, log_run_operation};
use crate::models::{LaunchMode, Run};
use crate::state_machine::{RunEvent, RunState, RunStateMachine, TransitionOutcome};
use chrono::Utc;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use uuid::Uuid;

/// State shared between the supervisor handle and its watcher tasks
pub(crate) struct SupervisorInner {
    pub(crate) state_machine: Arc<RunStateMachine>,
    pub(crate) registry: Arc<ProcessRegistry>,
    pub(crate) ports: Arc<PortAllocator>,
    pub(crate) config: SupervisorConfig,
    pub(crate) invocations: InvocationBuilder,
    pub(crate) watchers: TaskTracker,
}

/// What a successful launch produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchReceipt {
    pub run_id: Uuid,
    pub attempt: u32,
    pub pid: u32,
    pub base_port: u16,
    pub command: String,
}

/// Owns the mapping from run to live OS process
///
/// Every attempt gets a reserved registry slot, a port range, a header in the
/// run log, a child process in its own process group, and a watcher task that
/// reports the outcome to the state machine.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<SupervisorInner>,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("live", &self.inner.registry.len())
            .field("watchers", &self.inner.watchers.len())
            .finish()
    }
}

impl ProcessSupervisor {
    pub fn new(state_machine: Arc<RunStateMachine>, config: SupervisorConfig) -> Self {
        let inner = SupervisorInner {
            state_machine,
            registry: Arc::new(ProcessRegistry::new()),
            ports: Arc::new(PortAllocator::new(&config.ports)),
            invocations: InvocationBuilder::new(&config),
            config,
            watchers: TaskTracker::new(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.inner.registry
    }

    pub fn ports(&self) -> &Arc<PortAllocator> {
        &self.inner.ports
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Whether an attempt of the run currently holds a process slot
    pub fn is_live(&self, run_id: Uuid) -> bool {
        self.inner.registry.is_registered(run_id)
    }

    pub fn live_pid(&self, run_id: Uuid) -> Option<u32> {
        self.inner.registry.get(run_id).map(|live| live.pid)
    }

    /// Spawn the process for the run's current attempt
    ///
    /// The run must already be `starting`. Spawn failures are reported to the
    /// state machine as `SpawnFailed` and returned; a duplicate launch is
    /// rejected without touching the run.
    pub async fn launch(&self, run: &Run, mode: LaunchMode) -> SupervisorResult<LaunchReceipt> {
        let run_id = run.run_id;
        let attempt = run.execution_count;

        if run.status != RunState::Starting {
            return Err(SupervisorError::Spawn {
                run_id,
                reason: format!("run is {}, expected starting", run.status),
            });
        }

        self.reserve_slot(run_id, attempt).await?;

        match self.spawn_attempt(run, mode, attempt).await {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                log_error(
                    "supervisor",
                    "launch",
                    &err.to_string(),
                    Some(&run_id.to_string()),
                );
                let event = RunEvent::SpawnFailed {
                    attempt,
                    reason: err.to_string(),
                };
                if let Err(e) = self.inner.state_machine.transition(run_id, event).await {
                    log_error("supervisor", "record_spawn_failure", &e.to_string(), None);
                }
                self.inner.registry.release(run_id, attempt);
                self.inner.ports.release(run_id);
                Err(err)
            }
        }
    }

    /// Reserve the run's slot, letting a finalizing earlier attempt drain first
    async fn reserve_slot(&self, run_id: Uuid, attempt: u32) -> SupervisorResult<()> {
        match self.inner.registry.reserve(run_id, attempt) {
            Ok(()) => Ok(()),
            Err(err) => {
                let previous = self
                    .inner
                    .registry
                    .get(run_id)
                    .filter(|live| live.attempt < attempt);
                match previous {
                    Some(live) if live.wait_finished(self.inner.config.kill_wait()).await => {
                        self.inner.registry.reserve(run_id, attempt)
                    }
                    _ => Err(err),
                }
            }
        }
    }

    async fn spawn_attempt(
        &self,
        run: &Run,
        mode: LaunchMode,
        attempt: u32,
    ) -> SupervisorResult<LaunchReceipt> {
        let run_id = run.run_id;
        let paths = run.paths();

        if !paths.run_dir.is_dir() {
            return Err(SupervisorError::WorkingDirectoryMissing {
                run_id,
                path: paths.run_dir.clone(),
            });
        }

        let program = &run.snapshot().trainer_program;
        let executable =
            resolve_executable(program).ok_or_else(|| SupervisorError::ExecutableNotFound {
                run_id,
                program: program.clone(),
            })?;

        let lease = self
            .inner
            .ports
            .allocate(run_id, run.snapshot().num_envs())?;
        let invocation = self.inner.invocations.build(run, mode, lease.base_port);
        let command_line = invocation.display();

        let header_end = run_log::append_header(
            &paths.log_path,
            run_id,
            attempt,
            mode,
            &command_line,
            Utc::now(),
        )
        .await?;

        let stdout = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&paths.log_path)?;
        let stderr = stdout.try_clone()?;

        let mut command = Command::new(&executable);
        command
            .args(&invocation.args)
            .envs(&invocation.env)
            .current_dir(&paths.run_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| SupervisorError::Spawn {
            run_id,
            reason: format!("{}: {e}", executable.display()),
        })?;
        let pid = child.id().ok_or_else(|| SupervisorError::Spawn {
            run_id,
            reason: "process exited before its pid was observed".to_string(),
        })?;

        let (finished_tx, finished_rx) = watch::channel(false);
        let live = LiveProcess::new(run_id, attempt, pid, finished_rx);
        if !self.inner.registry.activate(live.clone()) {
            return Err(SupervisorError::Spawn {
                run_id,
                reason: "process slot was released during launch".to_string(),
            });
        }

        let spawned = RunEvent::Spawned {
            attempt,
            pid,
            command: command_line.clone(),
        };
        match self.inner.state_machine.transition(run_id, spawned).await? {
            TransitionOutcome::Applied { .. } => {}
            TransitionOutcome::Ignored { current, reason } => {
                return Err(SupervisorError::Spawn {
                    run_id,
                    reason: format!("run is {current}: {reason}"),
                });
            }
        }

        info!(
            run_id = %run_id,
            attempt,
            pid,
            base_port = lease.base_port,
            "🚀 SUPERVISOR: Spawned trainer"
        );
        log_run_operation("launch", run_id, Some(attempt), "starting", Some(&command_line));

        let watcher = AttemptWatcher {
            inner: self.inner.clone(),
            child,
            live,
            finished: finished_tx,
            log_path: paths.log_path.clone(),
            header_end,
        };
        self.inner.watchers.spawn(watcher.run());

        Ok(LaunchReceipt {
            run_id,
            attempt,
            pid,
            base_port: lease.base_port,
            command: command_line,
        })
    }

    /// Graceful stop with escalation
    ///
    /// Sends SIGTERM to the process group and waits up to `grace`. A process
    /// still present after that is killed and the run ends `killed`.
    pub async fn stop(&self, run_id: Uuid, grace: Duration) -> SupervisorResult<RunState> {
        let live = self
            .inner
            .registry
            .get(run_id)
            .ok_or(SupervisorError::NotRunning(run_id))?;

        live.request_graceful(grace);
        info!(
            run_id = %run_id,
            pid = live.pid,
            grace_seconds = grace.as_secs(),
            "🛑 SUPERVISOR: Requesting graceful stop"
        );

        let exited = match signal_process_group(live.pid, TerminationSignal::Terminate).await {
            Ok(()) => live.wait_finished(grace).await,
            Err(e) => {
                warn!(run_id = %run_id, "⚠️ SUPERVISOR: Graceful termination unavailable: {e}");
                false
            }
        };

        if !exited {
            warn!(
                run_id = %run_id,
                pid = live.pid,
                "⚠️ SUPERVISOR: Process ignored termination, escalating to kill"
            );
            self.terminate_forcefully(
                &live,
                format!("did not exit within {}s grace period", grace.as_secs()),
            )
            .await?;
        }

        Ok(self.inner.state_machine.current_state(run_id).await?)
    }

    /// Unconditional termination; the run always ends `killed`
    pub async fn force_kill(
        &self,
        run_id: Uuid,
        reason: impl Into<String>,
    ) -> SupervisorResult<RunState> {
        let live = self
            .inner
            .registry
            .get(run_id)
            .ok_or(SupervisorError::NotRunning(run_id))?;
        self.terminate_forcefully(&live, reason.into()).await?;
        Ok(self.inner.state_machine.current_state(run_id).await?)
    }

    async fn terminate_forcefully(&self, live: &LiveProcess, reason: String) -> SupervisorResult<()> {
        info!(run_id = %live.run_id, pid = live.pid, "💀 SUPERVISOR: Killing process group ({reason})");
        live.request_forced(reason);
        if let Err(e) = signal_process_group(live.pid, TerminationSignal::Kill).await {
            warn!(run_id = %live.run_id, "Group kill not delivered, relying on direct kill: {e}");
        }

        let kill_wait = self.inner.config.kill_wait();
        if live.wait_finished(kill_wait).await {
            Ok(())
        } else {
            Err(SupervisorError::Unresponsive {
                run_id: live.run_id,
                waited_seconds: kill_wait.as_secs(),
            })
        }
    }

    /// Stop every live process concurrently
    pub async fn shutdown(&self, grace: Duration) -> Vec<(Uuid, SupervisorResult<RunState>)> {
        let live = self.inner.registry.live();
        info!(count = live.len(), "🛑 SUPERVISOR: Shutting down live runs");
        join_all(
            live.into_iter()
                .map(|process| async move { (process.run_id, self.stop(process.run_id, grace).await) }),
        )
        .await
    }

    /// Wait for every watcher task to finish; `false` on timeout
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.inner.watchers.close();
        let idle = tokio::time::timeout(timeout, self.inner.watchers.wait())
            .await
            .is_ok();
        self.inner.watchers.reopen();
        idle
    }
}

/// Resolve a program name or path to an executable file
pub fn resolve_executable(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.is_absolute() || candidate.components().count() > 1 {
        return is_executable(candidate)
            .then(|| std::fs::canonicalize(candidate).ok())
            .flatten();
    }
    let search_path = std::env::var_os("PATH")?;
    std::env::split_paths(&search_path)
        .map(|dir| dir.join(program))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
