// Run state machine
//
// The lifecycle contract every run obeys. Callers submit requests, the
// process supervisor submits reports, and both go through the same
// serialized, guarded transition path.

pub mod actions;
pub mod errors;
pub mod events;
pub mod guards;
pub mod locks;
pub mod run_state_machine;
pub mod states;

// Re-export main types for convenient access
pub use errors::{GuardError, StateMachineError, StateMachineResult};
pub use events::RunEvent;
pub use run_state_machine::{
    determine_target_state, RunStateMachine, TransitionOutcome, TransitionRecord,
};
pub use states::RunState;

// Common traits and utilities
pub use actions::TransitionAction;
pub use guards::TransitionGuard;
pub use locks::RunLocks;
