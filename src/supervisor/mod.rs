//! # Process Supervisor
//!
//! Spawns the external trainer for a run attempt, owns its OS handle, streams
//! its output to the run log, and reports how the attempt ended.
//!
//! ## Key Features
//!
//! - **One live process per run** through an attempt-scoped [`ProcessRegistry`]
//! - **Process groups** so stop and kill reach the trainer's worker processes
//! - **Liveness probe** that separates "launched" from "responding"
//! - **Graceful stop with escalation** that distinguishes `stopped` from `killed`

pub mod errors;
pub mod invocation;
pub mod layout;
pub mod ports;
pub mod process_supervisor;
pub mod registry;
pub mod run_log;
pub mod signals;
mod watcher;

pub use errors::{SupervisorError, SupervisorResult};
pub use invocation::{Invocation, InvocationBuilder};
pub use layout::RunLayout;
pub use ports::{PortAllocator, PortLease};
pub use process_supervisor::{resolve_executable, LaunchReceipt, ProcessSupervisor};
pub use registry::{LiveProcess, ProcessRegistry, TerminationIntent};
pub use signals::TerminationSignal;
