//! crash-monitor: crash report job scheduler.
//!
//! Watches crash storage for newly arrived reports, assigns each one to
//! the least-loaded live processor, recovers work orphaned by dead
//! processors, services operator priority requests, and reclaims
//! finished job rows. Also provides a generic bounded worker pool for
//! the services that consume the job store.

// Core modules
pub mod cli;
pub mod config;
pub mod crashstore;
pub mod monitor;
pub mod pool;
pub mod shutdown;
pub mod store;

// Re-export commonly used types
pub use config::MonitorConfig;
pub use crashstore::{CrashStorage, CrashStoreError};
pub use monitor::{Monitor, MonitorError};
pub use pool::{PoolConfig, PoolError, TaskOutcome, WorkerPool};
pub use store::{JobStore, StoreError};
