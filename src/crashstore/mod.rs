//! Crash store contract.
//!
//! Raw crash artifacts live in an external, pluggable store (filesystem,
//! remote column store, ...). The scheduler consumes it through a narrow
//! contract:
//!
//! - `new_crashes`: destructive, at-most-once enumeration of newly
//!   arrived artifact ids
//! - `contains`: membership test for the priority lane
//! - `delete`: used by mover-style callers, never by the scheduler
//!
//! Real backends are provided by their own crates; `MemoryCrashStorage`
//! here makes the contract executable in tests and local runs.

pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::store::CrashId;

pub use memory::MemoryCrashStorage;

/// Errors that can occur against the crash store.
#[derive(Debug, Error)]
pub enum CrashStoreError {
    /// The backend is unreachable. Fatal for the enumerating pass; the
    /// next tick retries.
    #[error("Crash store unavailable: {0}")]
    Unavailable(String),

    /// Artifact not found.
    #[error("Artifact not found: {0}")]
    NotFound(CrashId),

    /// Backend-specific failure.
    #[error("Crash store error: {0}")]
    Backend(String),
}

/// Pluggable storage of raw crash artifacts.
#[async_trait]
pub trait CrashStorage: Send + Sync {
    /// Enumerates newly arrived artifact ids.
    ///
    /// The scan is destructive and at-most-once: every id yielded is
    /// considered claimed by this call and will not be yielded again,
    /// whether or not the caller acts on it.
    fn new_crashes(&self) -> BoxStream<'_, Result<CrashId, CrashStoreError>>;

    /// Whether the store currently holds the artifact.
    async fn contains(&self, uuid: &str) -> Result<bool, CrashStoreError>;

    /// Removes the artifact from the store.
    async fn delete(&self, uuid: &str) -> Result<(), CrashStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_store_error_display() {
        let err = CrashStoreError::Unavailable("connection reset".to_string());
        assert!(err.to_string().contains("connection reset"));

        let err = CrashStoreError::NotFound("abc".to_string());
        assert!(err.to_string().contains("abc"));
    }
}
