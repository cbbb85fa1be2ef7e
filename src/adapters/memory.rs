use crate::blocking::{BlockingStorage, BoxIter};
use crate::{Capabilities, Error, Result, Storage};
use futures::stream::{self, BoxStream};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

/// A simple in-memory store.
///
/// - `Id` is a `String`.
/// - Data is stored as raw bytes in a `HashMap`.
/// - Clones share the same map, so one instance can back several composites.
/// - Enumerable; keys are listed in sorted order.
/// - Implements both [`Storage`] and [`BlockingStorage`].
///
/// Deletes are idempotent by default. [`MemoryStorage::strict`] builds a store
/// that reports [`Error::NotFound`] when deleting a missing key instead.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    strict_delete: bool,
}

impl MemoryStorage {
    /// Create a new empty in-memory storage with idempotent deletes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty in-memory storage whose deletes fail on missing keys.
    pub fn strict() -> Self {
        Self {
            strict_delete: true,
            ..Self::default()
        }
    }

    /// Create a new in-memory storage from an existing map.
    pub fn from_map(map: HashMap<String, Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
            strict_delete: false,
        }
    }

    /// Returns true if deleting a missing key is an error.
    pub fn is_strict(&self) -> bool {
        self.strict_delete
    }

    /// Returns the number of stored objects.
    pub fn len(&self) -> usize {
        self.inner.read().expect("poisoned lock").len()
    }

    /// Returns true if there are no stored objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all objects.
    pub fn clear(&self) {
        self.inner.write().expect("poisoned lock").clear();
    }

    /// Returns true if `id` is stored.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().expect("poisoned lock").contains_key(id)
    }

    /// A sorted copy of everything stored (useful for tests).
    pub fn contents(&self) -> BTreeMap<String, Vec<u8>> {
        let map = self.inner.read().expect("poisoned lock");
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn fetch(&self, id: &str) -> Result<Vec<u8>> {
        let map = self.inner.read().expect("poisoned lock");
        map.get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn insert(&self, id: String, data: Vec<u8>) {
        let mut map = self.inner.write().expect("poisoned lock");
        map.insert(id, data);
    }

    fn remove(&self, id: &str) -> Result<()> {
        let mut map = self.inner.write().expect("poisoned lock");
        match map.remove(id) {
            Some(_) => Ok(()),
            None if self.strict_delete => Err(Error::NotFound(id.to_string())),
            None => Ok(()),
        }
    }

    fn sorted_keys(&self) -> Vec<String> {
        let map = self.inner.read().expect("poisoned lock");
        let mut ids: Vec<String> = map.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Avoid dumping potentially large in-memory contents.
        f.debug_struct("MemoryStorage")
            .field("len", &self.len())
            .field("strict_delete", &self.strict_delete)
            .finish()
    }
}

impl Storage for MemoryStorage {
    type Id = String;

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    async fn exists(&self, id: &Self::Id) -> Result<bool> {
        Ok(self.contains(id))
    }

    async fn put(&self, id: Self::Id, data: Vec<u8>) -> Result<()> {
        self.insert(id, data);
        Ok(())
    }

    async fn get(&self, id: &Self::Id) -> Result<Vec<u8>> {
        self.fetch(id)
    }

    async fn delete(&self, id: &Self::Id) -> Result<()> {
        self.remove(id)
    }

    async fn keys(&self) -> Result<BoxStream<'_, Result<Self::Id>>> {
        // Snapshot the key set so the lock is not held while the stream is polled.
        let ids = self.sorted_keys();
        Ok(Box::pin(stream::iter(ids.into_iter().map(Ok))))
    }
}

impl BlockingStorage for MemoryStorage {
    type Id = String;

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    fn exists(&self, id: &Self::Id) -> Result<bool> {
        Ok(self.contains(id))
    }

    fn put(&self, id: Self::Id, data: Vec<u8>) -> Result<()> {
        self.insert(id, data);
        Ok(())
    }

    fn get(&self, id: &Self::Id) -> Result<Vec<u8>> {
        self.fetch(id)
    }

    fn delete(&self, id: &Self::Id) -> Result<()> {
        self.remove(id)
    }

    fn keys(&self) -> Result<BoxIter<'_, Result<Self::Id>>> {
        Ok(Box::new(self.sorted_keys().into_iter().map(Ok)))
    }
}
