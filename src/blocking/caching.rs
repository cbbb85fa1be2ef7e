use super::{BlockingStorage, BoxIter};
use crate::{Capabilities, Error, Result};

/// Sequential twin of [`multi::CachingStorage`](crate::multi::CachingStorage).
///
/// Same read-through and write-through rules: `main` is authoritative and
/// always touched first on mutation, cache failures are logged and never
/// surface to the caller.
#[derive(Debug)]
pub struct CachingStorage<M, C>
where
    M: BlockingStorage,
    C: BlockingStorage<Id = M::Id>,
{
    main: M,
    cache: C,
    capabilities: Capabilities,
}

impl<M, C> CachingStorage<M, C>
where
    M: BlockingStorage,
    C: BlockingStorage<Id = M::Id>,
{
    /// Create a caching store. Fails with [`Error::Config`] if the cache is
    /// not readable and writable, or `main` is not readable.
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

    pub fn main(&self) -> &M {
        &self.main
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Drop a single cached entry.
    pub fn evict(&self, id: &M::Id) -> Result<()> {
        match self.cache.delete(id) {
            Ok(()) | Err(Error::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Drop every cached entry and return how many were removed. Requires an
    /// enumerable cache.
    pub fn clear_cache(&self) -> Result<usize> {
        self.cache
            .capabilities()
            .require(Capabilities::ALL, "clear_cache")?;

        let ids = self.cache.keys()?.collect::<Result<Vec<_>>>()?;
        let mut removed = 0;
        for id in &ids {
            match self.cache.delete(id) {
                Ok(()) => removed += 1,
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        tracing::debug!(removed, "Cache cleared");
        Ok(removed)
    }

    fn invalidate(&self, id: &M::Id) {
        match self.cache.delete(id) {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => {
                tracing::error!(?id, error = %e, "Cache invalidation failed, entry may be stale");
            }
        }
    }
}

impl<M, C> BlockingStorage for CachingStorage<M, C>
where
    M: BlockingStorage,
    C: BlockingStorage<Id = M::Id>,
{
    type Id = M::Id;

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn exists(&self, id: &Self::Id) -> Result<bool> {
        match self.cache.exists(id) {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(?id, error = %e, "Cache exists check failed, consulting main store");
            }
        }
        self.main.exists(id)
    }

    fn put(&self, id: Self::Id, data: Vec<u8>) -> Result<()> {
        self.main.put(id.clone(), data.clone())?;

        if let Err(e) = self.cache.put(id.clone(), data) {
            tracing::warn!(?id, error = %e, "Cache write failed, invalidating cached entry");
            self.invalidate(&id);
        }
        Ok(())
    }

    fn get(&self, id: &Self::Id) -> Result<Vec<u8>> {
        match self.cache.get(id) {
            Ok(data) => return Ok(data),
            Err(Error::NotFound(_)) => tracing::debug!(?id, "Cache miss"),
            Err(e) => {
                tracing::warn!(?id, error = %e, "Cache read failed, falling back to main store");
            }
        }

        let data = self.main.get(id)?;
        if let Err(e) = self.cache.put(id.clone(), data.clone()) {
            tracing::warn!(?id, error = %e, "Cache population failed (best-effort)");
        }
        Ok(data)
    }

    fn delete(&self, id: &Self::Id) -> Result<()> {
        self.main.delete(id)?;
        match self.cache.delete(id) {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => {
                tracing::warn!(?id, error = %e, "Cache invalidation failed after delete");
            }
        }
        Ok(())
    }

    fn keys(&self) -> Result<BoxIter<'_, Result<Self::Id>>> {
        self.main.keys()
    }

    fn open(&self) -> Result<()> {
        self.main.open()?;
        self.cache.open()
    }

    fn close(&self) -> Result<()> {
        let cache_result = self.cache.close();
        self.main.close()?;
        cache_result
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::MemoryStorage;

    #[test]
    fn test_read_through_and_write_through() {
        let main = MemoryStorage::new();
        let cache = MemoryStorage::new();
        let storage = CachingStorage::new(main.clone(), cache.clone()).unwrap();

        storage.put("a".to_string(), b"1".to_vec()).unwrap();
        assert!(main.contains("a"));
        assert!(cache.contains("a"));

        cache.clear();
        assert_eq!(storage.get(&"a".to_string()).unwrap(), b"1");
        assert!(cache.contains("a"));

        storage.evict(&"a".to_string()).unwrap();
        assert!(!cache.contains("a"));
        assert!(storage.exists(&"a".to_string()).unwrap());
    }

    #[test]
    fn test_clear_cache_leaves_main_intact() {
        let main = MemoryStorage::new();
        let cache = MemoryStorage::new();
        let storage = CachingStorage::new(main.clone(), cache.clone()).unwrap();
        for key in ["a", "b", "c"] {
            storage.put(key.to_string(), key.as_bytes().to_vec()).unwrap();
        }

        assert_eq!(storage.clear_cache().unwrap(), 3);
        assert!(cache.is_empty());
        assert_eq!(main.len(), 3);

        assert_eq!(storage.get(&"b".to_string()).unwrap(), b"b");
        assert!(cache.contains("b"));
        assert_eq!(storage.clear_cache().unwrap(), 1);
    }

    #[test]
    fn test_get_missing_everywhere() {
        let storage = CachingStorage::new(MemoryStorage::new(), MemoryStorage::new()).unwrap();
        let err = storage.get(&"nope".to_string()).unwrap_err();
        assert!(err.is_not_found());
    }
}
