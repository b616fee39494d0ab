//! Run → live process mapping
//!
//! The single shared structure that enforces at most one process per run.
//! A slot is reserved before anything is spawned and released by the watcher
//! of the same attempt, so a late watcher can never evict a newer attempt.

use super::errors::{SupervisorError, SupervisorResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Why the supervisor is ending an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationIntent {
    /// Graceful stop; an exit after `deadline` counts as a failed cooperation
    Graceful { deadline: Instant },
    /// Forced termination with the reason recorded on the run
    Forced { reason: String },
}

/// Handle to a live process, shared by the watcher and control requests
#[derive(Debug, Clone)]
pub struct LiveProcess {
    pub run_id: Uuid,
    pub attempt: u32,
    pub pid: u32,
    pub started: Instant,
    intent: Arc<Mutex<Option<TerminationIntent>>>,
    kill: CancellationToken,
    finished: watch::Receiver<bool>,
}

impl LiveProcess {
    pub(crate) fn new(
        run_id: Uuid,
        attempt: u32,
        pid: u32,
        finished: watch::Receiver<bool>,
    ) -> Self {
        Self {
            run_id,
            attempt,
            pid,
            started: Instant::now(),
            intent: Arc::new(Mutex::new(None)),
            kill: CancellationToken::new(),
            finished,
        }
    }

    /// Record a graceful stop unless a stronger intent is already set
    pub fn request_graceful(&self, grace: Duration) {
        let mut intent = self.intent.lock();
        if intent.is_none() {
            *intent = Some(TerminationIntent::Graceful {
                deadline: Instant::now() + grace,
            });
        }
    }

    /// Record a forced termination; the first forced reason wins
    pub fn request_forced(&self, reason: impl Into<String>) {
        let mut intent = self.intent.lock();
        if !matches!(*intent, Some(TerminationIntent::Forced { .. })) {
            *intent = Some(TerminationIntent::Forced {
                reason: reason.into(),
            });
        }
        drop(intent);
        self.kill.cancel();
    }

    pub fn intent(&self) -> Option<TerminationIntent> {
        self.intent.lock().clone()
    }

    pub(crate) fn kill_token(&self) -> &CancellationToken {
        &self.kill
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Wait until the watcher has finalized the attempt; `false` on timeout
    pub async fn wait_finished(&self, timeout: Duration) -> bool {
        let mut finished = self.finished.clone();
        let done = tokio::time::timeout(timeout, finished.wait_for(|flag| *flag))
            .await
            .is_ok();
        done
    }
}

#[derive(Debug, Clone)]
enum ProcessSlot {
    /// Reserved while the attempt is being spawned
    Launching { attempt: u32 },
    Live(LiveProcess),
}

impl ProcessSlot {
    fn attempt(&self) -> u32 {
        match self {
            Self::Launching { attempt } => *attempt,
            Self::Live(live) => live.attempt,
        }
    }
}

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    slots: DashMap<Uuid, ProcessSlot>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the run's slot for `attempt`; fails if any attempt holds it
    pub fn reserve(&self, run_id: Uuid, attempt: u32) -> SupervisorResult<()> {
        match self.slots.entry(run_id) {
            Entry::Occupied(occupied) => {
                let pid = match occupied.get() {
                    ProcessSlot::Live(live) => Some(live.pid),
                    ProcessSlot::Launching { .. } => None,
                };
                Err(SupervisorError::AlreadyRunning { run_id, pid })
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ProcessSlot::Launching { attempt });
                Ok(())
            }
        }
    }

    /// Attach the spawned process to its reservation
    pub fn activate(&self, live: LiveProcess) -> bool {
        match self.slots.get_mut(&live.run_id) {
            Some(mut slot) if slot.attempt() == live.attempt => {
                *slot = ProcessSlot::Live(live);
                true
            }
            _ => false,
        }
    }

    /// Free the slot if it still belongs to `attempt`
    pub fn release(&self, run_id: Uuid, attempt: u32) -> bool {
        self.slots
            .remove_if(&run_id, |_, slot| slot.attempt() == attempt)
            .is_some()
    }

    pub fn get(&self, run_id: Uuid) -> Option<LiveProcess> {
        self.slots.get(&run_id).and_then(|slot| match slot.value() {
            ProcessSlot::Live(live) => Some(live.clone()),
            ProcessSlot::Launching { .. } => None,
        })
    }

    /// Whether any attempt (launching or live) holds the run's slot
    pub fn is_registered(&self, run_id: Uuid) -> bool {
        self.slots.contains_key(&run_id)
    }

    pub fn live(&self) -> Vec<LiveProcess> {
        self.slots
            .iter()
            .filter_map(|slot| match slot.value() {
                ProcessSlot::Live(live) => Some(live.clone()),
                ProcessSlot::Launching { .. } => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
