//! In-memory job store for testing and local development.
//!
//! Behaves like the PostgreSQL store over plain maps: same liveness
//! threshold semantics, same inclusive reassignment ranges, same
//! dead-owner handling for priority claims. State is not persisted.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    CrashId, Job, JobOutcome, JobPriority, JobStore, ProcessorId, ProcessorLoad, StoreError,
};

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<CrashId, Job>,
    processors: BTreeMap<ProcessorId, DateTime<Utc>>,
    priority_requests: BTreeSet<CrashId>,
    priority_claims: BTreeSet<(ProcessorId, CrashId)>,
}

/// In-memory job store.
///
/// Intended for tests and local development; cloning shares the
/// underlying state.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    state: Arc<RwLock<State>>,
}

impl MemoryJobStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fully-formed job row, bypassing the queued-now default.
    ///
    /// Test helper for seeding jobs with specific timestamps.
    pub async fn insert_job_row(&self, job: Job) {
        let mut state = self.state.write().await;
        state.jobs.insert(job.uuid.clone(), job);
    }

    /// Overrides a processor's heartbeat timestamp (registering it if
    /// needed). Test helper for simulating dead processors.
    pub async fn set_last_seen(&self, id: ProcessorId, last_seen_at: DateTime<Utc>) {
        let mut state = self.state.write().await;
        state.processors.insert(id, last_seen_at);
    }

    /// Records a terminal outcome for a job, as the owning processor would.
    pub async fn set_outcome(&self, uuid: &str, outcome: JobOutcome) {
        let mut state = self.state.write().await;
        if let Some(job) = state.jobs.get_mut(uuid) {
            job.outcome = Some(outcome);
            job.completed_at = Some(Utc::now());
        }
    }

    /// Marks a job as started, as the owning processor would.
    pub async fn set_started(&self, uuid: &str) {
        let mut state = self.state.write().await;
        if let Some(job) = state.jobs.get_mut(uuid) {
            job.started_at = Some(Utc::now());
        }
    }

    /// Returns all job rows.
    pub async fn all_jobs(&self) -> Vec<Job> {
        self.state.read().await.jobs.values().cloned().collect()
    }

    /// Returns all registered processor ids.
    pub async fn processor_ids(&self) -> Vec<ProcessorId> {
        self.state.read().await.processors.keys().copied().collect()
    }

    /// Returns all priority claims as `(owner, uuid)` pairs.
    pub async fn claims(&self) -> Vec<(ProcessorId, CrashId)> {
        self.state
            .read()
            .await
            .priority_claims
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_job(
        &self,
        uuid: &str,
        owner: ProcessorId,
        priority: JobPriority,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(uuid) {
            return Err(StoreError::Duplicate(format!("job {}", uuid)));
        }
        state
            .jobs
            .insert(uuid.to_string(), Job::new(uuid, owner).with_priority(priority));
        Ok(())
    }

    async fn job_owner(&self, uuid: &str) -> Result<Option<ProcessorId>, StoreError> {
        Ok(self.state.read().await.jobs.get(uuid).map(|j| j.owner))
    }

    async fn job(&self, uuid: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.state.read().await.jobs.get(uuid).cloned())
    }

    async fn live_processors(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<ProcessorId>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .processors
            .iter()
            .filter(|(_, seen)| **seen >= threshold)
            .map(|(id, _)| *id)
            .collect())
    }

    async fn dead_processors(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<ProcessorId>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .processors
            .iter()
            .filter(|(_, seen)| **seen < threshold)
            .map(|(id, _)| *id)
            .collect())
    }

    async fn processor_loads(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<ProcessorLoad>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .processors
            .iter()
            .filter(|(_, seen)| **seen >= threshold)
            .map(|(id, _)| ProcessorLoad {
                id: *id,
                open_jobs: state
                    .jobs
                    .values()
                    .filter(|j| j.owner == *id && !j.is_complete())
                    .count() as i64,
            })
            .collect())
    }

    async fn queued_range(
        &self,
        owners: &[ProcessorId],
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, StoreError> {
        let state = self.state.read().await;
        let mut range: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
        for job in state.jobs.values() {
            if !owners.contains(&job.owner) || job.is_complete() {
                continue;
            }
            range = Some(match range {
                None => (job.queued_at, job.queued_at),
                Some((lo, hi)) => (lo.min(job.queued_at), hi.max(job.queued_at)),
            });
        }
        Ok(range)
    }

    async fn reassign_jobs_in_range(
        &self,
        owners: &[ProcessorId],
        lo: DateTime<Utc>,
        hi: DateTime<Utc>,
        new_owner: ProcessorId,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let mut moved = 0;
        for job in state.jobs.values_mut() {
            if owners.contains(&job.owner)
                && !job.is_complete()
                && job.queued_at >= lo
                && job.queued_at <= hi
            {
                job.owner = new_owner;
                job.started_at = None;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn requeue_priority_claims(&self, owner: ProcessorId) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let claimed: Vec<CrashId> = state
            .priority_claims
            .iter()
            .filter(|(o, _)| *o == owner)
            .map(|(_, uuid)| uuid.clone())
            .collect();
        let mut requeued = 0;
        for uuid in claimed {
            if state.priority_requests.insert(uuid.clone()) {
                requeued += 1;
            }
            state.priority_claims.remove(&(owner, uuid));
        }
        Ok(requeued)
    }

    async fn delete_processors(&self, ids: &[ProcessorId]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for id in ids {
            state.processors.remove(id);
        }
        Ok(())
    }

    async fn pending_priority_requests(&self) -> Result<Vec<CrashId>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .priority_requests
            .iter()
            .cloned()
            .collect())
    }

    async fn insert_priority_request(&self, uuid: &str) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .priority_requests
            .insert(uuid.to_string());
        Ok(())
    }

    async fn delete_priority_request(&self, uuid: &str) -> Result<(), StoreError> {
        self.state.write().await.priority_requests.remove(uuid);
        Ok(())
    }

    async fn add_priority_claim(
        &self,
        owner: ProcessorId,
        uuid: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if !state.processors.contains_key(&owner) {
            return Ok(false);
        }
        state.priority_claims.insert((owner, uuid.to_string()));
        Ok(true)
    }

    async fn delete_completed_jobs(&self) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, job| !job.is_complete());
        Ok((before - state.jobs.len()) as u64)
    }

    async fn register_processor(&self, id: ProcessorId) -> Result<(), StoreError> {
        self.state.write().await.processors.insert(id, Utc::now());
        Ok(())
    }

    async fn heartbeat(&self, id: ProcessorId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        match state.processors.get_mut(&id) {
            Some(seen) => {
                *seen = Utc::now();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("processor {}", id))),
        }
    }
}
