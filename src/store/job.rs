//! Domain types for the job store.
//!
//! These mirror the datastore rows the scheduler works with:
//!
//! - `Job`: one crash artifact assigned to one processor
//! - `Processor`: an analysis worker tracked by heartbeat
//! - `ProcessorLoad`: a `(processor, open job count)` snapshot row

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of an analysis processor (datastore `integer`).
pub type ProcessorId = i32;

/// Identifier of a stored crash artifact (opaque, datastore `text`).
pub type CrashId = String;

/// Scheduling priority of a job.
///
/// Elevated jobs come from the priority lane (operator-requested
/// re-analysis) rather than normal discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPriority {
    Normal,
    Elevated,
}

impl JobPriority {
    /// Datastore representation (`integer` column).
    pub fn as_i32(self) -> i32 {
        match self {
            JobPriority::Normal => 0,
            JobPriority::Elevated => 1,
        }
    }

    /// Parses the datastore representation. Unknown values map to `Normal`.
    pub fn from_i32(value: i32) -> Self {
        if value >= 1 {
            JobPriority::Elevated
        } else {
            JobPriority::Normal
        }
    }
}

/// Terminal outcome of a job, written by the owning processor.
///
/// A job with no outcome yet is still pending; the cleanup loop only
/// reclaims rows whose outcome is non-null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Success,
    Failure,
}

impl JobOutcome {
    /// Datastore representation (`text` column).
    pub fn as_str(self) -> &'static str {
        match self {
            JobOutcome::Success => "success",
            JobOutcome::Failure => "failure",
        }
    }

    /// Parses the datastore representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(JobOutcome::Success),
            "failure" => Some(JobOutcome::Failure),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of scheduled work: one crash artifact assigned to one processor.
///
/// The scheduler owns creation and deletion; `started_at`, `completed_at`
/// and `outcome` are mutated exclusively by the owning processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Crash artifact id this job analyzes.
    pub uuid: CrashId,
    /// Processor the job is assigned to. Best-effort: may go stale if the
    /// owner dies, until the next dead-processor sweep reassigns it.
    pub owner: ProcessorId,
    /// Scheduling priority.
    pub priority: JobPriority,
    /// When the scheduler queued the job.
    pub queued_at: DateTime<Utc>,
    /// When the owning processor began analysis, if it has.
    pub started_at: Option<DateTime<Utc>>,
    /// When the owning processor finished, if it has.
    pub completed_at: Option<DateTime<Utc>>,
    /// Terminal outcome; `None` while the job is pending or in flight.
    pub outcome: Option<JobOutcome>,
}

impl Job {
    /// Creates a new pending job queued now.
    pub fn new(uuid: impl Into<CrashId>, owner: ProcessorId) -> Self {
        Self {
            uuid: uuid.into(),
            owner,
            priority: JobPriority::Normal,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            outcome: None,
        }
    }

    /// Sets the scheduling priority.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the queued timestamp.
    pub fn with_queued_at(mut self, queued_at: DateTime<Utc>) -> Self {
        self.queued_at = queued_at;
        self
    }

    /// Whether the owning processor has recorded a terminal outcome.
    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }
}

/// An analysis processor, tracked via its heartbeat timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Processor {
    pub id: ProcessorId,
    /// Last heartbeat write from the processor process itself.
    pub last_seen_at: DateTime<Utc>,
}

impl Processor {
    /// Whether this processor counts as live given the liveness threshold
    /// (`now - 2 x check-in interval`).
    pub fn is_live(&self, threshold: DateTime<Utc>) -> bool {
        self.last_seen_at >= threshold
    }
}

/// Snapshot row for balanced assignment: a live processor and its open
/// (outcome-null) job count, taken once per scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorLoad {
    pub id: ProcessorId,
    pub open_jobs: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_priority_roundtrip() {
        assert_eq!(JobPriority::Normal.as_i32(), 0);
        assert_eq!(JobPriority::Elevated.as_i32(), 1);
        assert_eq!(JobPriority::from_i32(0), JobPriority::Normal);
        assert_eq!(JobPriority::from_i32(1), JobPriority::Elevated);
        assert_eq!(JobPriority::from_i32(7), JobPriority::Elevated);
        assert_eq!(JobPriority::from_i32(-3), JobPriority::Normal);
    }

    #[test]
    fn test_outcome_roundtrip() {
        assert_eq!(JobOutcome::Success.as_str(), "success");
        assert_eq!(JobOutcome::parse("failure"), Some(JobOutcome::Failure));
        assert_eq!(JobOutcome::parse("bogus"), None);
        assert_eq!(format!("{}", JobOutcome::Success), "success");
    }

    #[test]
    fn test_job_new_is_pending() {
        let job = Job::new("abc123", 4);
        assert_eq!(job.owner, 4);
        assert_eq!(job.priority, JobPriority::Normal);
        assert!(job.started_at.is_none());
        assert!(job.outcome.is_none());
        assert!(!job.is_complete());
    }

    #[test]
    fn test_job_builders() {
        let queued = Utc::now() - Duration::minutes(10);
        let job = Job::new("abc123", 1)
            .with_priority(JobPriority::Elevated)
            .with_queued_at(queued);
        assert_eq!(job.priority, JobPriority::Elevated);
        assert_eq!(job.queued_at, queued);
    }

    #[test]
    fn test_processor_liveness() {
        let now = Utc::now();
        let threshold = now - Duration::minutes(10);
        let live = Processor {
            id: 1,
            last_seen_at: now - Duration::minutes(5),
        };
        let dead = Processor {
            id: 2,
            last_seen_at: now - Duration::minutes(15),
        };
        assert!(live.is_live(threshold));
        assert!(!dead.is_live(threshold));
    }
}
