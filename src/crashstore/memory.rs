//! In-memory crash storage for testing and local development.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::RwLock;

use super::{CrashStorage, CrashStoreError};
use crate::store::CrashId;

#[derive(Debug, Default)]
struct State {
    /// Ids not yet yielded by an enumeration pass, in arrival order.
    pending: VecDeque<CrashId>,
    /// Every artifact the store holds (pending or already enumerated).
    stored: HashSet<CrashId>,
}

/// In-memory crash storage.
///
/// Artifacts are bare ids; there is no payload. Cloning shares the
/// underlying state. Not persisted across restarts.
#[derive(Debug, Clone, Default)]
pub struct MemoryCrashStorage {
    state: Arc<RwLock<State>>,
}

impl MemoryCrashStorage {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a newly arrived artifact.
    pub async fn insert(&self, uuid: impl Into<CrashId>) {
        let uuid = uuid.into();
        let mut state = self.state.write().await;
        if state.stored.insert(uuid.clone()) {
            state.pending.push_back(uuid);
        }
    }

    /// Adds several artifacts at once.
    pub async fn seed<I, S>(&self, uuids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<CrashId>,
    {
        for uuid in uuids {
            self.insert(uuid).await;
        }
    }

    /// Number of artifacts currently held.
    pub async fn len(&self) -> usize {
        self.state.read().await.stored.len()
    }

    /// Whether the store holds no artifacts.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.stored.is_empty()
    }
}

#[async_trait]
impl CrashStorage for MemoryCrashStorage {
    fn new_crashes(&self) -> BoxStream<'_, Result<CrashId, CrashStoreError>> {
        // Each id is popped as it is yielded: ids consumed by an aborted
        // pass stay consumed, matching the at-most-once contract.
        Box::pin(stream! {
            loop {
                let next = self.state.write().await.pending.pop_front();
                match next {
                    Some(uuid) => yield Ok(uuid),
                    None => break,
                }
            }
        })
    }

    async fn contains(&self, uuid: &str) -> Result<bool, CrashStoreError> {
        Ok(self.state.read().await.stored.contains(uuid))
    }

    async fn delete(&self, uuid: &str) -> Result<(), CrashStoreError> {
        let mut state = self.state.write().await;
        if !state.stored.remove(uuid) {
            return Err(CrashStoreError::NotFound(uuid.to_string()));
        }
        state.pending.retain(|p| p != uuid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_enumeration_is_destructive() {
        let store = MemoryCrashStorage::new();
        store.seed(["a", "b", "c"]).await;

        let first: Vec<_> = store
            .new_crashes()
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(first, vec!["a", "b", "c"]);

        let second: Vec<_> = store.new_crashes().collect::<Vec<_>>().await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_contains_survives_enumeration() {
        let store = MemoryCrashStorage::new();
        store.insert("a").await;

        let _: Vec<_> = store.new_crashes().collect::<Vec<_>>().await;
        assert!(store.contains("a").await.unwrap());
        assert!(!store.contains("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryCrashStorage::new();
        store.insert("a").await;

        store.delete("a").await.unwrap();
        assert!(!store.contains("a").await.unwrap());
        assert!(matches!(
            store.delete("a").await,
            Err(CrashStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_partial_enumeration_claims_yielded_ids() {
        let store = MemoryCrashStorage::new();
        store.seed(["a", "b"]).await;

        {
            let mut stream = store.new_crashes();
            let first = stream.next().await.unwrap().unwrap();
            assert_eq!(first, "a");
            // pass aborts here; "a" stays claimed
        }

        let rest: Vec<_> = store
            .new_crashes()
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(rest, vec!["b"]);
    }
}
