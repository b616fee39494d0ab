//! Per-attempt watcher task
//!
//! Owns the child process of exactly one attempt. It confirms liveness,
//! delivers forced kills, re-checks that the exit status is still observable
//! at each supervision ceiling, and on exit emits the terminal transition
//! before releasing the attempt's process slot.

use super::process_supervisor::SupervisorInner;
use super::registry::{LiveProcess, TerminationIntent};
use super::run_log;
use crate::config::LivenessConfig;
use crate::constants::MIN_WATCHER_POLL;
use crate::logging::{log_error, log_run_operation};
use crate::state_machine::{determine_target_state, RunEvent, RunState, TransitionOutcome};
use chrono::Utc;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Effectively unbounded when no ceiling is configured
const NO_CEILING: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

enum Step {
    Exited(std::io::Result<ExitStatus>),
    Kill,
    Probe,
    Ceiling,
}

enum WatchOutcome {
    Exited(std::io::Result<ExitStatus>),
    Unobservable {
        ceiling: Duration,
        error: std::io::Error,
    },
}

/// Result of polling the child when the supervision ceiling elapses
#[derive(Debug)]
enum CeilingCheck {
    StillRunning,
    Exited(ExitStatus),
    Lost(std::io::Error),
}

impl From<std::io::Result<Option<ExitStatus>>> for CeilingCheck {
    fn from(polled: std::io::Result<Option<ExitStatus>>) -> Self {
        match polled {
            Ok(None) => Self::StillRunning,
            Ok(Some(status)) => Self::Exited(status),
            Err(e) => Self::Lost(e),
        }
    }
}

pub(crate) struct AttemptWatcher {
    pub(crate) inner: Arc<SupervisorInner>,
    pub(crate) child: Child,
    pub(crate) live: LiveProcess,
    pub(crate) finished: watch::Sender<bool>,
    pub(crate) log_path: PathBuf,
    /// Log size right after the attempt header was written
    pub(crate) header_end: u64,
}

impl AttemptWatcher {
    pub(crate) async fn run(mut self) {
        let outcome = self.observe().await;
        let event = self.classify(outcome);
        self.finalize(event).await;
    }

    async fn observe(&mut self) -> WatchOutcome {
        let liveness = self.inner.config.liveness.clone();
        let mut probe = tokio::time::interval(liveness.poll_interval().max(MIN_WATCHER_POLL));
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let ceiling = self.inner.config.supervision_ceiling();
        let ceiling_period = ceiling.unwrap_or(NO_CEILING);
        let ceiling_timer = tokio::time::sleep(ceiling_period);
        tokio::pin!(ceiling_timer);

        let mut alive_reported = false;
        let mut kill_delivered = false;

        loop {
            let step = tokio::select! {
                status = self.child.wait() => Step::Exited(status),
                _ = self.live.kill_token().cancelled(), if !kill_delivered => Step::Kill,
                _ = probe.tick(), if !alive_reported => Step::Probe,
                _ = &mut ceiling_timer, if ceiling.is_some() => Step::Ceiling,
            };

            match step {
                Step::Exited(status) => return WatchOutcome::Exited(status),
                Step::Kill => {
                    kill_delivered = true;
                    if let Err(e) = self.child.start_kill() {
                        debug!(run_id = %self.live.run_id, "Direct kill not delivered: {e}");
                    }
                }
                Step::Probe => {
                    if self.is_responding(&liveness).await {
                        alive_reported = true;
                        self.report_alive().await;
                    }
                }
                Step::Ceiling => match CeilingCheck::from(self.child.try_wait()) {
                    CeilingCheck::StillRunning => {
                        warn!(
                            run_id = %self.live.run_id,
                            attempt = self.live.attempt,
                            pid = self.live.pid,
                            "⏳ WATCHER: Still running after {}s, supervision continues",
                            ceiling_period.as_secs()
                        );
                        ceiling_timer
                            .as_mut()
                            .reset(tokio::time::Instant::now() + ceiling_period);
                    }
                    CeilingCheck::Exited(status) => return WatchOutcome::Exited(Ok(status)),
                    CeilingCheck::Lost(error) => {
                        warn!(
                            run_id = %self.live.run_id,
                            attempt = self.live.attempt,
                            pid = self.live.pid,
                            "⚠️ WATCHER: Exit status no longer observable: {error}"
                        );
                        return WatchOutcome::Unobservable {
                            ceiling: ceiling_period,
                            error,
                        };
                    }
                },
            }
        }
    }

    /// The process survived the initial delay and, if required, wrote output
    async fn is_responding(&mut self, liveness: &LivenessConfig) -> bool {
        if self.live.started.elapsed() < liveness.initial_delay() {
            return false;
        }
        if !matches!(self.child.try_wait(), Ok(None)) {
            return false;
        }
        if !liveness.require_log_output {
            return true;
        }
        match run_log::stat(&self.log_path).await {
            Ok(Some((size, _))) => size > self.header_end,
            _ => false,
        }
    }

    async fn report_alive(&self) {
        let event = RunEvent::ProcessAlive {
            attempt: self.live.attempt,
        };
        match self.inner.state_machine.transition(self.live.run_id, event).await {
            Ok(TransitionOutcome::Applied { .. }) => {
                log_run_operation(
                    "mark_running",
                    self.live.run_id,
                    Some(self.live.attempt),
                    "running",
                    None,
                );
            }
            Ok(TransitionOutcome::Ignored { reason, .. }) => {
                debug!(run_id = %self.live.run_id, "Liveness report ignored: {reason}");
            }
            Err(e) => log_error("watcher", "mark_running", &e.to_string(), None),
        }
    }

    fn classify(&self, outcome: WatchOutcome) -> RunEvent {
        classify_outcome(self.live.attempt, self.live.intent(), outcome)
    }

    /// Footer, terminal transition, slot release, then wake waiters
    async fn finalize(self, event: RunEvent) {
        let run_id = self.live.run_id;
        let attempt = self.live.attempt;
        let expected = determine_target_state(RunState::Running, &event).unwrap_or(RunState::Failed);

        if let Err(e) = run_log::append_footer(
            &self.log_path,
            attempt,
            expected,
            event.failure_reason().as_deref(),
            Utc::now(),
        )
        .await
        {
            warn!(run_id = %run_id, "Failed to append log footer: {e}");
        }

        match self.inner.state_machine.transition(run_id, event).await {
            Ok(TransitionOutcome::Applied { to, run, .. }) => {
                info!(
                    run_id = %run_id,
                    attempt,
                    exit_code = ?run.exit_code,
                    "🏁 WATCHER: Attempt finished as {to}"
                );
                log_run_operation(
                    "finalize",
                    run_id,
                    Some(attempt),
                    to.as_str(),
                    run.failure_reason.as_deref(),
                );
            }
            Ok(TransitionOutcome::Ignored { current, reason }) => {
                debug!(run_id = %run_id, current = %current, "Exit report ignored: {reason}");
            }
            Err(e) => log_error("watcher", "finalize", &e.to_string(), Some(&run_id.to_string())),
        }

        self.inner.registry.release(run_id, attempt);
        self.inner.ports.release(run_id);
        self.finished.send_replace(true);
    }
}

fn classify_outcome(
    attempt: u32,
    intent: Option<TerminationIntent>,
    outcome: WatchOutcome,
) -> RunEvent {
    match outcome {
        WatchOutcome::Exited(Ok(status)) => {
            let exit_code = status.code();
            match intent {
                Some(TerminationIntent::Forced { reason }) => RunEvent::Killed { attempt, reason },
                Some(TerminationIntent::Graceful { deadline }) if Instant::now() <= deadline => {
                    RunEvent::Stopped { attempt, exit_code }
                }
                Some(TerminationIntent::Graceful { .. }) => RunEvent::Killed {
                    attempt,
                    reason: "did not exit within the stop grace period".to_string(),
                },
                None => RunEvent::ProcessExited {
                    attempt,
                    exit_code,
                    signal: exit_signal(&status),
                },
            }
        }
        WatchOutcome::Exited(Err(e)) => RunEvent::SupervisionLost {
            attempt,
            reason: format!("failed to observe process exit: {e}"),
        },
        WatchOutcome::Unobservable { ceiling, error } => RunEvent::SupervisionLost {
            attempt,
            reason: format!(
                "exit status unobservable after {}s: {error}",
                ceiling.as_secs()
            ),
        },
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
