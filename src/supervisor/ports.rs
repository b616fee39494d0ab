use super::errors::{SupervisorError, SupervisorResult};
use crate::config::PortConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

/// Contiguous port range reserved for one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortLease {
    pub base_port: u16,
    pub count: u16,
}

impl PortLease {
    pub fn last_port(&self) -> u16 {
        self.base_port + (self.count - 1)
    }
}

/// First-fit allocator for trainer communication ports
///
/// Each live run occupies `[base_port, base_port + count)` plus `spacing`
/// ports of separation before the next range.
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    spacing: u16,
    leases: Mutex<HashMap<Uuid, PortLease>>,
}

impl PortAllocator {
    pub fn new(config: &PortConfig) -> Self {
        Self {
            base: config.base,
            spacing: config.spacing,
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve a range for a run, replacing any lease it still holds
    pub fn allocate(&self, run_id: Uuid, count: u16) -> SupervisorResult<PortLease> {
        let count = count.max(1);
        let mut leases = self.leases.lock();
        leases.remove(&run_id);

        let mut occupied: Vec<(u32, u32)> = leases
            .values()
            .map(|lease| {
                let start = u32::from(lease.base_port);
                (start, start + u32::from(lease.count) + u32::from(self.spacing) - 1)
            })
            .collect();
        occupied.sort_unstable();

        let needed = u32::from(count) + u32::from(self.spacing);
        let mut candidate = u32::from(self.base);
        for (start, end) in occupied {
            if candidate + needed <= start {
                break;
            }
            candidate = candidate.max(end + 1);
        }

        if candidate + u32::from(count) - 1 > u32::from(u16::MAX) {
            return Err(SupervisorError::PortsExhausted {
                base: self.base,
                needed: count,
            });
        }

        let lease = PortLease {
            base_port: candidate as u16,
            count,
        };
        leases.insert(run_id, lease);
        info!(
            run_id = %run_id,
            "🔌 PORTS: Allocated {}-{} ({} envs)",
            lease.base_port,
            lease.last_port(),
            count
        );
        Ok(lease)
    }

    pub fn release(&self, run_id: Uuid) -> Option<PortLease> {
        let released = self.leases.lock().remove(&run_id);
        if let Some(lease) = released {
            info!(
                run_id = %run_id,
                "🔌 PORTS: Released {}-{}",
                lease.base_port,
                lease.last_port()
            );
        }
        released
    }

    pub fn lease_for(&self, run_id: Uuid) -> Option<PortLease> {
        self.leases.lock().get(&run_id).copied()
    }
}
