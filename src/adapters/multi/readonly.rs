use crate::{Capabilities, Error, Result, Storage};
use futures::stream::BoxStream;
use std::fmt::Debug;
use tracing;

/// Wraps any storage backend and prevents all write operations.
///
/// The wrapper narrows the capability set of what it wraps: it is never
/// writable, so composites and reconciliation reject it as a destination up
/// front.
///
/// ```
/// # use stowage_compose::{Storage, StorageExt};
/// # use stowage_compose::multi::ReadOnlyStorage;
/// # use stowage_compose::MemoryStorage;
/// # async fn example() -> stowage_compose::Result<()> {
/// let storage = ReadOnlyStorage::new(MemoryStorage::new());
/// assert!(!storage.capabilities().writable);
/// assert!(storage.put_bytes("file.txt".to_string(), b"data").await.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ReadOnlyStorage<S: Storage> {
    inner: S,
}

impl<S: Storage> ReadOnlyStorage<S> {
    /// Create a read-only wrapper around any storage backend.
    pub fn new(storage: S) -> Self {
        Self { inner: storage }
    }

    /// Get a reference to the inner storage.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwrap and return the inner storage.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Storage> Storage for ReadOnlyStorage<S> {
    type Id = S::Id;

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities().without_writes()
    }

    async fn exists(&self, id: &Self::Id) -> Result<bool> {
        self.inner.exists(id).await
    }

    async fn put(&self, id: Self::Id, _data: Vec<u8>) -> Result<()> {
        tracing::warn!(?id, "Rejected put on read-only store");
        Err(Error::Unsupported("put on a read-only store".to_string()))
    }

    async fn get(&self, id: &Self::Id) -> Result<Vec<u8>> {
        self.inner.get(id).await
    }

    async fn delete(&self, id: &Self::Id) -> Result<()> {
        tracing::warn!(?id, "Rejected delete on read-only store");
        Err(Error::Unsupported("delete on a read-only store".to_string()))
    }

    async fn keys(&self) -> Result<BoxStream<'_, Result<Self::Id>>> {
        self.inner.keys().await
    }

    async fn open(&self) -> Result<()> {
        self.inner.open().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
