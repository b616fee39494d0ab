//! # Restart Controller
//!
//! Turns a restart request plus a mode into a new supervised attempt of the
//! same immutable snapshot.

pub mod controller;

pub use crate::models::RestartMode;
pub use controller::RestartController;
