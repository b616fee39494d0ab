use super::{NoteSink, RepositoryError, RepositoryResult, RevisionStore, RunRepository};
use crate::models::{Revision, RevisionDraft, Run};
use crate::state_machine::RunState;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

/// Run repository held in process memory
#[derive(Debug, Default)]
pub struct InMemoryRunRepository {
    runs: DashMap<Uuid, Run>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn get(&self, run_id: Uuid) -> RepositoryResult<Option<Run>> {
        Ok(self.runs.get(&run_id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, run: &Run) -> RepositoryResult<()> {
        self.runs.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn list_by_status(&self, status: RunState) -> RepositoryResult<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .runs
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.value().clone())
            .collect();
        runs.sort_by_key(|run| run.created_at);
        Ok(runs)
    }

    async fn list_by_experiment(&self, experiment_id: Uuid) -> RepositoryResult<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .runs
            .iter()
            .filter(|entry| entry.experiment_id == experiment_id)
            .map(|entry| entry.value().clone())
            .collect();
        runs.sort_by_key(|run| run.created_at);
        Ok(runs)
    }
}

/// Revision store held in process memory, ordered by insertion
///
/// ```rust
/// use runforge_core::models::RevisionDraft;
/// use runforge_core::repository::{InMemoryRevisionStore, RevisionStore};
/// use serde_json::json;
/// use uuid::Uuid;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryRevisionStore::new();
/// let experiment_id = Uuid::new_v4();
/// let base = store
///     .create_revision(RevisionDraft::new(experiment_id, "base", json!({"behaviors": {}})))
///     .await
///     .unwrap();
/// let child = store.create_revision(base.derive("gen-1")).await.unwrap();
///
/// let latest = store.latest_revision(experiment_id).await.unwrap().unwrap();
/// assert_eq!(latest.revision_id, child.revision_id);
/// assert_eq!(latest.parent_revision_id, Some(base.revision_id));
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryRevisionStore {
    revisions: RwLock<Vec<Revision>>,
}

impl InMemoryRevisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed revision (seeding from an external catalog)
    pub fn insert(&self, revision: Revision) -> RepositoryResult<()> {
        let mut revisions = self.revisions.write();
        if revisions.iter().any(|r| r.revision_id == revision.revision_id) {
            return Err(RepositoryError::Duplicate {
                entity: "revision",
                id: revision.revision_id,
            });
        }
        revisions.push(revision);
        Ok(())
    }

    pub fn list_for_experiment(&self, experiment_id: Uuid) -> Vec<Revision> {
        self.revisions
            .read()
            .iter()
            .filter(|r| r.experiment_id == experiment_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RevisionStore for InMemoryRevisionStore {
    async fn get(&self, revision_id: Uuid) -> RepositoryResult<Option<Revision>> {
        Ok(self
            .revisions
            .read()
            .iter()
            .find(|r| r.revision_id == revision_id)
            .cloned())
    }

    async fn latest_revision(&self, experiment_id: Uuid) -> RepositoryResult<Option<Revision>> {
        // Insertion order breaks timestamp ties
        Ok(self
            .revisions
            .read()
            .iter()
            .rev()
            .find(|r| r.experiment_id == experiment_id)
            .cloned())
    }

    async fn create_revision(&self, draft: RevisionDraft) -> RepositoryResult<Revision> {
        let revision = draft.into_revision(Uuid::new_v4());
        self.revisions.write().push(revision.clone());
        Ok(revision)
    }

    async fn list_revisions(&self, experiment_id: Uuid) -> RepositoryResult<Vec<Revision>> {
        Ok(self.list_for_experiment(experiment_id))
    }
}

/// Note sink that keeps notes per target
#[derive(Debug, Default)]
pub struct InMemoryNoteSink {
    notes: DashMap<Uuid, Vec<String>>,
}

impl InMemoryNoteSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notes_for(&self, target_id: Uuid) -> Vec<String> {
        self.notes
            .get(&target_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NoteSink for InMemoryNoteSink {
    async fn add_note(&self, target_id: Uuid, note: String) -> RepositoryResult<()> {
        self.notes.entry(target_id).or_default().push(note);
        Ok(())
    }
}
