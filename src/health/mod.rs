//! # Health Monitor
//!
//! Classifies `starting`/`running` runs as healthy, stuck, or indeterminate
//! from elapsed runtime and log silence. Advisory only.

pub mod monitor;
pub mod policy;

pub use monitor::HealthMonitor;
pub use policy::{HealthPhase, HealthPolicy, Verdict};
