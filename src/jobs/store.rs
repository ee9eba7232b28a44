//! In-memory job arena keyed by job id.
//!
//! One `RwLock` guards the whole map; every mutation goes through
//! [`JobArena::update`] under the write lock, so a reader either sees a
//! job state from before an update or after it, never a torn one. Nothing
//! expires automatically; `remove` exists for operators.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;

/// Shared, Uuid-keyed store of job records.
pub struct JobArena<T> {
    inner: Arc<RwLock<HashMap<Uuid, T>>>,
}

impl<T> Clone for JobArena<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for JobArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JobArena<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a job record, replacing any previous record under the id.
    pub async fn insert(&self, id: Uuid, job: T) {
        self.inner.write().await.insert(id, job);
    }

    /// Apply a mutation to one job atomically with respect to readers.
    pub async fn update<F>(&self, id: Uuid, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut T),
    {
        let mut guard = self.inner.write().await;
        let job = guard.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        mutate(job);
        Ok(())
    }

    /// Remove a job record, returning it.
    pub async fn remove(&self, id: Uuid) -> Result<T, StoreError> {
        self.inner
            .write()
            .await
            .remove(&id)
            .ok_or(StoreError::NotFound(id))
    }

    /// Number of jobs currently stored.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl<T: Clone> JobArena<T> {
    /// Snapshot one job record.
    pub async fn get(&self, id: Uuid) -> Result<T, StoreError> {
        self.inner
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_get() {
        let arena: JobArena<String> = JobArena::new();
        let id = Uuid::new_v4();

        arena.insert(id, "hello".to_string()).await;

        assert_eq!(arena.get(id).await.unwrap(), "hello");
        assert_eq!(arena.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_unknown_id_is_not_found() {
        let arena: JobArena<String> = JobArena::new();
        let id = Uuid::new_v4();

        let err = arena.get(id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(got) if got == id));
    }

    #[tokio::test]
    async fn test_update_mutates_in_place() {
        let arena: JobArena<Vec<u32>> = JobArena::new();
        let id = Uuid::new_v4();
        arena.insert(id, vec![1]).await;

        arena.update(id, |v| v.push(2)).await.unwrap();

        assert_eq!(arena.get(id).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_update_unknown_id_fails() {
        let arena: JobArena<u32> = JobArena::new();
        assert!(arena.update(Uuid::new_v4(), |v| *v += 1).await.is_err());
    }

    #[tokio::test]
    async fn test_remove() {
        let arena: JobArena<u32> = JobArena::new();
        let id = Uuid::new_v4();
        arena.insert(id, 7).await;

        assert_eq!(arena.remove(id).await.unwrap(), 7);
        assert!(arena.is_empty().await);
        assert!(arena.remove(id).await.is_err());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let arena: JobArena<u32> = JobArena::new();
        let clone = arena.clone();
        let id = Uuid::new_v4();

        arena.insert(id, 1).await;
        clone.update(id, |v| *v = 2).await.unwrap();

        assert_eq!(arena.get(id).await.unwrap(), 2);
    }
}
