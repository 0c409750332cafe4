//! Job store: the authoritative id → record ledger.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::error::JobError;
use crate::worker::state::{Job, JobState};

#[derive(Default)]
struct Records {
    jobs: HashMap<String, Job>,
    /// Ids in insertion order.
    order: Vec<String>,
}

/// Append-only store of job records for the lifetime of one engine.
///
/// Only the engine writes; readers get cloned snapshots.
#[derive(Default)]
pub struct JobStore {
    records: RwLock<Records>,
}

impl JobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new job in the `Created` state.
    ///
    /// Fails without touching the store if the id is already taken.
    pub async fn create(&self, id: &str, data: serde_json::Value) -> Result<Job, JobError> {
        let mut records = self.records.write().await;
        if records.jobs.contains_key(id) {
            return Err(JobError::Duplicate { id: id.to_string() });
        }

        let job = Job::new(id, data);
        records.order.push(job.id.clone());
        records.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    /// Get a job snapshot by id.
    pub async fn get(&self, id: &str) -> Option<Job> {
        self.records.read().await.jobs.get(id).cloned()
    }

    /// All jobs, in insertion order.
    pub async fn all(&self) -> Vec<Job> {
        let records = self.records.read().await;
        records
            .order
            .iter()
            .filter_map(|id| records.jobs.get(id).cloned())
            .collect()
    }

    /// Number of jobs ever created.
    pub async fn len(&self) -> usize {
        self.records.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.order.is_empty()
    }

    /// Apply a mutation to one record and return the updated snapshot.
    pub(crate) async fn update<F>(&self, id: &str, f: F) -> Result<Job, JobError>
    where
        F: FnOnce(&mut Job) -> Result<(), JobError>,
    {
        let mut records = self.records.write().await;
        let job = records
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound { id: id.to_string() })?;
        f(job)?;
        Ok(job.clone())
    }

    /// Move a job to `target` and return the updated snapshot.
    pub(crate) async fn transition(&self, id: &str, target: JobState) -> Result<Job, JobError> {
        self.update(id, |job| job.transition_to(target)).await
    }

    /// Count jobs per state.
    pub async fn summary(&self) -> StoreSummary {
        let records = self.records.read().await;

        let mut summary = StoreSummary::default();
        for job in records.jobs.values() {
            match job.state {
                JobState::Created => summary.created += 1,
                JobState::Queued => summary.queued += 1,
                JobState::Running => summary.running += 1,
                JobState::Completed => summary.completed += 1,
                JobState::Failed => summary.failed += 1,
            }
        }

        summary.total = records.jobs.len();
        summary
    }
}

/// Per-state counts of the store contents.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreSummary {
    pub total: usize,
    pub created: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}
