use crate::{Capabilities, Error, Result, Storage};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::fmt::Debug;
use tracing;

/// Fronts an authoritative `main` store with a fast `cache` store.
///
/// - Reads are served from the cache; a miss reads `main` and populates the
///   cache on the way out.
/// - Writes and deletes go to `main` first, then to the cache. A failure in
///   `main` fails the operation and leaves the cache untouched.
/// - Cache failures are logged and swallowed: `main` stays authoritative, and
///   a cache entry that could not be refreshed is invalidated so it is never
///   served stale.
///
/// ```
/// # use stowage_compose::{MemoryStorage, Storage, StorageExt};
/// # use stowage_compose::multi::CachingStorage;
/// # async fn example() -> stowage_compose::Result<()> {
/// let main = MemoryStorage::new();
/// let cache = MemoryStorage::new();
/// let storage = CachingStorage::new(main.clone(), cache.clone())?;
///
/// storage.put_bytes("file.txt".to_string(), b"data").await?;
/// assert!(main.contains("file.txt"));
///
/// cache.clear();
/// assert_eq!(storage.get(&"file.txt".to_string()).await?, b"data");
/// assert!(cache.contains("file.txt"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CachingStorage<M, C>
where
    M: Storage,
    C: Storage<Id = M::Id>,
{
    main: M,
    cache: C,
    capabilities: Capabilities,
}

impl<M, C> CachingStorage<M, C>
where
    M: Storage,
    C: Storage<Id = M::Id>,
{
    /// Create a caching store over `main` and `cache`.
    ///
    /// Fails with [`Error::Config`] if the cache cannot be both read and
    /// written, or if `main` cannot be read.
    pub fn new(main: M, cache: C) -> Result<Self> {
        let cache_caps = cache.capabilities();
        if !cache_caps.contains(Capabilities::READ_WRITE) {
            return Err(Error::Config(format!(
                "cache store must be readable and writable, got [{cache_caps}]"
            )));
        }
        let main_caps = main.capabilities();
        if !main_caps.readable {
            return Err(Error::Config(format!(
                "main store must be readable, got [{main_caps}]"
            )));
        }

        Ok(Self {
            main,
            cache,
            capabilities: main_caps,
        })
    }

    /// Get a reference to the authoritative store.
    pub fn main(&self) -> &M {
        &self.main
    }

    /// Get a reference to the cache store.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Drop a single cached entry. `main` is not touched.
    pub async fn evict(&self, id: &M::Id) -> Result<()> {
        match self.cache.delete(id).await {
            Ok(()) | Err(Error::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Drop every cached entry and return how many were removed.
    ///
    /// Requires an enumerable cache. `main` is not touched.
    pub async fn clear_cache(&self) -> Result<usize> {
        self.cache
            .capabilities()
            .require(Capabilities::ALL, "clear_cache")?;

        let ids: Vec<M::Id> = {
            let mut listing = self.cache.keys().await?;
            let mut ids = Vec::new();
            while let Some(id) = listing.next().await {
                ids.push(id?);
            }
            ids
        };

        let mut removed = 0;
        for id in &ids {
            match self.cache.delete(id).await {
                Ok(()) => removed += 1,
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        tracing::debug!(removed, "Cache cleared");
        Ok(removed)
    }
}

impl<M, C> Storage for CachingStorage<M, C>
where
    M: Storage,
    C: Storage<Id = M::Id>,
{
    type Id = M::Id;

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn exists(&self, id: &Self::Id) -> Result<bool> {
        match self.cache.exists(id).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(?id, error = %e, "Cache exists check failed, consulting main store");
            }
        }
        self.main.exists(id).await
    }

    async fn put(&self, id: Self::Id, data: Vec<u8>) -> Result<()> {
        // Main must be durable before the cache can see the new value.
        self.main.put(id.clone(), data.clone()).await?;

        if let Err(e) = self.cache.put(id.clone(), data).await {
            tracing::warn!(?id, error = %e, "Cache write failed, invalidating cached entry");
            match self.cache.delete(&id).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => {
                    tracing::error!(?id, error = %e, "Cache invalidation failed, entry may be stale");
                }
            }
        }
        Ok(())
    }

    async fn get(&self, id: &Self::Id) -> Result<Vec<u8>> {
        match self.cache.get(id).await {
            Ok(data) => {
                tracing::trace!(?id, "Cache hit");
                return Ok(data);
            }
            Err(Error::NotFound(_)) => {
                tracing::debug!(?id, "Cache miss");
            }
            Err(e) => {
                tracing::warn!(?id, error = %e, "Cache read failed, falling back to main store");
            }
        }

        let data = self.main.get(id).await?;

        if let Err(e) = self.cache.put(id.clone(), data.clone()).await {
            tracing::warn!(?id, error = %e, "Cache population failed (best-effort)");
        }
        Ok(data)
    }

    async fn delete(&self, id: &Self::Id) -> Result<()> {
        self.main.delete(id).await?;

        match self.cache.delete(id).await {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => {
                tracing::warn!(?id, error = %e, "Cache invalidation failed after delete");
            }
        }
        Ok(())
    }

    async fn keys(&self) -> Result<BoxStream<'_, Result<Self::Id>>> {
        self.main.keys().await
    }

    async fn open(&self) -> Result<()> {
        self.main.open().await?;
        self.cache.open().await
    }

    async fn close(&self) -> Result<()> {
        let cache_result = self.cache.close().await;
        self.main.close().await?;
        cache_result
    }
}
