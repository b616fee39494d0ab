use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-run mutual exclusion
///
/// Transitions for one run are serialized by holding that run's lock across
/// load, guard, action, and save. Different runs never contend.
#[derive(Debug, Default, Clone)]
pub struct RunLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a run
    pub async fn acquire(&self, run_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(run_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}
