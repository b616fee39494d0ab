//! # Repository Collaborators
//!
//! The orchestration engine does not own persistence. It consumes run and
//! revision stores through these traits and treats them as strongly
//! consistent. In-memory implementations back the tests and single-process
//! deployments.

pub mod memory;

use crate::models::{Revision, RevisionDraft, Run};
use crate::state_machine::RunState;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use memory::{InMemoryNoteSink, InMemoryRevisionStore, InMemoryRunRepository};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Record not found: {entity} {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Duplicate record: {entity} {id}")]
    Duplicate { entity: &'static str, id: Uuid },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Run persistence consumed by the state machine
#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn get(&self, run_id: Uuid) -> RepositoryResult<Option<Run>>;

    /// Insert or replace a run record
    async fn save(&self, run: &Run) -> RepositoryResult<()>;

    async fn list_by_status(&self, status: RunState) -> RepositoryResult<Vec<Run>>;

    /// Runs of one experiment, oldest first
    async fn list_by_experiment(&self, experiment_id: Uuid) -> RepositoryResult<Vec<Run>>;
}

/// Revision persistence consumed by run creation and the plugin API
#[async_trait]
pub trait RevisionStore: Send + Sync {
    async fn get(&self, revision_id: Uuid) -> RepositoryResult<Option<Revision>>;

    /// Most recently created revision of an experiment
    async fn latest_revision(&self, experiment_id: Uuid) -> RepositoryResult<Option<Revision>>;

    async fn create_revision(&self, draft: RevisionDraft) -> RepositoryResult<Revision>;

    /// Revisions of one experiment in creation order
    async fn list_revisions(&self, experiment_id: Uuid) -> RepositoryResult<Vec<Revision>>;
}

/// Destination for plugin notes attached to experiments, runs, or revisions
#[async_trait]
pub trait NoteSink: Send + Sync {
    async fn add_note(&self, target_id: Uuid, note: String) -> RepositoryResult<()>;
}
