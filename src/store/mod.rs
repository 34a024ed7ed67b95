//! Job store access layer.
//!
//! The scheduler coordinates the fleet through three relational tables
//! (plus one for priority claims):
//!
//! - `jobs`: one row per crash artifact awaiting or undergoing analysis
//! - `processors`: heartbeat registry of analysis workers
//! - `priority_requests`: operator-requested expedited artifacts
//! - `priority_claims`: which processor holds each expedited artifact
//!
//! `JobStore` is the seam between scheduling logic and the datastore.
//! `PgJobStore` is the production PostgreSQL implementation over a sqlx
//! connection pool; `MemoryJobStore` is an in-memory twin for tests and
//! local development.

pub mod job;
pub mod memory;
pub mod migrations;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use job::{CrashId, Job, JobOutcome, JobPriority, Processor, ProcessorId, ProcessorLoad};
pub use memory::MemoryJobStore;
pub use migrations::{MigrationError, MigrationRunner};
pub use postgres::PgJobStore;

/// Errors that can occur during job store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the datastore failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Record not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A row with the same key already exists.
    #[error("Duplicate record: {0}")]
    Duplicate(String),
}

/// Datastore operations the scheduler depends on.
///
/// All liveness-sensitive operations take an explicit `threshold`
/// timestamp (`now - 2 x check-in interval`) computed by the caller, so a
/// single pass judges every processor against the same instant.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new job row for `uuid` owned by `owner`.
    ///
    /// Fails if a live job row for the same uuid already exists; there is
    /// exactly one live job per artifact at a time.
    async fn insert_job(
        &self,
        uuid: &str,
        owner: ProcessorId,
        priority: JobPriority,
    ) -> Result<(), StoreError>;

    /// Returns the current owner of the job for `uuid`, if one is queued.
    async fn job_owner(&self, uuid: &str) -> Result<Option<ProcessorId>, StoreError>;

    /// Returns the full job row for `uuid`, if one is queued.
    async fn job(&self, uuid: &str) -> Result<Option<Job>, StoreError>;

    /// Processors whose heartbeat is at or after `threshold`.
    async fn live_processors(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<ProcessorId>, StoreError>;

    /// Processors whose heartbeat is before `threshold`.
    async fn dead_processors(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<ProcessorId>, StoreError>;

    /// Live processors with their open (outcome-null) job counts.
    ///
    /// This is the once-per-pass snapshot behind balanced assignment;
    /// counts are not re-queried per job.
    async fn processor_loads(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<ProcessorLoad>, StoreError>;

    /// Queued-time range `[earliest, latest]` of the incomplete jobs owned
    /// by any of `owners`, or `None` when they own no incomplete jobs.
    async fn queued_range(
        &self,
        owners: &[ProcessorId],
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, StoreError>;

    /// Reassigns the incomplete jobs of `owners` whose `queued_at` falls in
    /// `[lo, hi]` (inclusive at both ends) to `new_owner`, resetting
    /// `started_at` so the new owner re-processes them from scratch.
    ///
    /// Returns the number of jobs moved.
    async fn reassign_jobs_in_range(
        &self,
        owners: &[ProcessorId],
        lo: DateTime<Utc>,
        hi: DateTime<Utc>,
        new_owner: ProcessorId,
    ) -> Result<u64, StoreError>;

    /// Moves `owner`'s priority claims back into the shared priority
    /// request queue and drops the claims. Returns the number requeued.
    async fn requeue_priority_claims(&self, owner: ProcessorId) -> Result<u64, StoreError>;

    /// Deletes processor rows (after their work has been reassigned).
    async fn delete_processors(&self, ids: &[ProcessorId]) -> Result<(), StoreError>;

    /// All pending priority request uuids.
    async fn pending_priority_requests(&self) -> Result<Vec<CrashId>, StoreError>;

    /// Creates a priority request for `uuid`. Duplicate requests collapse.
    async fn insert_priority_request(&self, uuid: &str) -> Result<(), StoreError>;

    /// Drops the priority request for `uuid`, if any.
    async fn delete_priority_request(&self, uuid: &str) -> Result<(), StoreError>;

    /// Records that `owner` holds the expedited artifact `uuid`.
    ///
    /// Returns `false` when `owner` is no longer registered (a dead
    /// processor); the caller defers the request to the next pass.
    async fn add_priority_claim(&self, owner: ProcessorId, uuid: &str)
        -> Result<bool, StoreError>;

    /// Deletes every job row with a terminal outcome. Returns the count.
    async fn delete_completed_jobs(&self) -> Result<u64, StoreError>;

    /// Registers a processor, or refreshes its heartbeat if already known.
    async fn register_processor(&self, id: ProcessorId) -> Result<(), StoreError>;

    /// Refreshes a processor's heartbeat timestamp.
    async fn heartbeat(&self, id: ProcessorId) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("refused"));

        let err = StoreError::NotFound("job abc".to_string());
        assert!(err.to_string().contains("job abc"));
    }
}
