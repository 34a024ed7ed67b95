//! Generic bounded worker pool.
//!
//! Reusable engine for "pull jobs from a source, run a task on each"
//! services. Processors consuming the job store are the primary user,
//! but the engine knows nothing about crash reports: any `JobSource` and
//! `TaskAction` pair works.
//!
//! - **engine**: dispatcher, bounded backlog, workers, statistics
//! - **retry**: task outcomes and the escalating backoff schedule

pub mod engine;
pub mod retry;

pub use engine::{
    Fetch, JobSource, PoolConfig, PoolError, PoolStats, TaskAction, WorkerPool,
};
pub use retry::{RetryPolicy, TaskOutcome};
