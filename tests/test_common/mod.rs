//! Common test utilities and a reusable contract suite for stores.
//!
//! The `storage_test_suite!` macro generates the backend-interface contract
//! tests for any `Storage<Id = String>`; composites run it too, since they are
//! stores in their own right.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::StreamExt;
use stowage_compose::blocking::{BlockingStorage, BoxIter};
use stowage_compose::{Capabilities, Error, MemoryStorage, Result, Storage, StorageExt};

/// Generate the contract suite for a store.
///
/// ```ignore
/// storage_test_suite!(setup = async { MemoryStorage::new() });
/// ```
#[macro_export]
macro_rules! storage_test_suite {
    (
        setup = $setup:expr
        $(, cleanup = $cleanup:expr)?
    ) => {
        mod storage_test_suite {
            use super::*;
            use crate::test_common::*;

            #[tokio::test]
            async fn test_put_and_exists() {
                let storage = $setup.await;
                run_test_put_and_exists(&storage).await;
                $( $cleanup(storage).await; )?
            }

            #[tokio::test]
            async fn test_put_then_get() {
                let storage = $setup.await;
                run_test_put_then_get(&storage).await;
                $( $cleanup(storage).await; )?
            }

            #[tokio::test]
            async fn test_get_missing_is_not_found() {
                let storage = $setup.await;
                run_test_get_missing(&storage).await;
                $( $cleanup(storage).await; )?
            }

            #[tokio::test]
            async fn test_overwrite() {
                let storage = $setup.await;
                run_test_overwrite(&storage).await;
                $( $cleanup(storage).await; )?
            }

            #[tokio::test]
            async fn test_delete_existing() {
                let storage = $setup.await;
                run_test_delete_existing(&storage).await;
                $( $cleanup(storage).await; )?
            }

            #[tokio::test]
            async fn test_empty_and_binary_data() {
                let storage = $setup.await;
                run_test_empty_and_binary_data(&storage).await;
                $( $cleanup(storage).await; )?
            }

            #[tokio::test]
            async fn test_keys_reissue_listing() {
                let storage = $setup.await;
                run_test_keys(&storage).await;
                $( $cleanup(storage).await; )?
            }
        }
    };
}

pub async fn run_test_put_and_exists<S: Storage<Id = String>>(storage: &S) {
    let id = "test.txt".to_string();
    assert!(!storage.exists(&id).await.unwrap());

    storage.put_bytes(id.clone(), b"hello world").await.unwrap();
    assert!(storage.exists(&id).await.unwrap());
}

pub async fn run_test_put_then_get<S: Storage<Id = String>>(storage: &S) {
    let id = "nested/dir/test.txt".to_string();
    storage.put_bytes(id.clone(), b"hello world").await.unwrap();
    assert_eq!(storage.get(&id).await.unwrap(), b"hello world");
    assert_eq!(storage.get_string(&id).await.unwrap(), "hello world");
}

pub async fn run_test_get_missing<S: Storage<Id = String>>(storage: &S) {
    let err = storage.get(&"missing.txt".to_string()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
    assert!(!storage.exists(&"missing.txt".to_string()).await.unwrap());
}

pub async fn run_test_overwrite<S: Storage<Id = String>>(storage: &S) {
    let id = "file.txt".to_string();
    storage.put_bytes(id.clone(), b"first").await.unwrap();
    storage.put_bytes(id.clone(), b"second").await.unwrap();
    assert_eq!(storage.get(&id).await.unwrap(), b"second");
}

pub async fn run_test_delete_existing<S: Storage<Id = String>>(storage: &S) {
    let id = "doomed.txt".to_string();
    storage.put_bytes(id.clone(), b"bye").await.unwrap();
    storage.delete(&id).await.unwrap();

    assert!(!storage.exists(&id).await.unwrap());
    assert!(storage.get(&id).await.unwrap_err().is_not_found());
}

pub async fn run_test_empty_and_binary_data<S: Storage<Id = String>>(storage: &S) {
    storage.put_bytes("empty".to_string(), b"").await.unwrap();
    assert!(storage.get(&"empty".to_string()).await.unwrap().is_empty());

    let binary: Vec<u8> = (0..=255).collect();
    storage.put("binary".to_string(), binary.clone()).await.unwrap();
    assert_eq!(storage.get(&"binary".to_string()).await.unwrap(), binary);
}

pub async fn run_test_keys<S: Storage<Id = String>>(storage: &S) {
    if !storage.capabilities().enumerable {
        let err = storage.keys().await.err().expect("non-enumerable store listed keys");
        assert!(matches!(err, Error::Unsupported(_)));
        return;
    }

    for key in ["a", "b/c", "d"] {
        storage.put_bytes(key.to_string(), b"x").await.unwrap();
    }

    let first = sorted_keys(storage).await;
    assert_eq!(first, vec!["a", "b/c", "d"]);

    // A second call re-issues the listing and sees later writes.
    storage.put_bytes("e".to_string(), b"x").await.unwrap();
    let second = sorted_keys(storage).await;
    assert_eq!(second, vec!["a", "b/c", "d", "e"]);
}

/// Collect and sort every key of an enumerable store.
pub async fn sorted_keys<S: Storage<Id = String>>(storage: &S) -> Vec<String> {
    let mut keys: Vec<String> = storage
        .keys()
        .await
        .unwrap()
        .map(|k| k.unwrap())
        .collect()
        .await;
    keys.sort();
    keys
}

/// A memory store pre-filled with `pairs`.
pub fn seeded(pairs: &[(&str, &str)]) -> MemoryStorage {
    let store = MemoryStorage::new();
    for (k, v) in pairs {
        BlockingStorage::put(&store, k.to_string(), v.as_bytes().to_vec()).unwrap();
    }
    store
}

/// Snapshot of a memory store as UTF-8 pairs, sorted by key.
pub fn snapshot(store: &MemoryStorage) -> Vec<(String, String)> {
    store
        .contents()
        .into_iter()
        .map(|(k, v)| (k, String::from_utf8(v).unwrap()))
        .collect()
}

pub fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A memory-backed store that can be taken offline and slowed down.
///
/// Clones share state, so a test can keep a handle while a composite owns
/// another. While offline every operation fails with a backend error;
/// poisoned keys fail individually.
#[derive(Debug, Clone)]
pub struct FlakyStorage {
    name: String,
    inner: MemoryStorage,
    offline: Arc<AtomicBool>,
    reject_puts: Arc<AtomicBool>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    poisoned: Arc<Mutex<HashSet<String>>>,
    capabilities: Capabilities,
}

impl FlakyStorage {
    pub fn new(name: &str) -> Self {
        Self::over(name, MemoryStorage::new())
    }

    pub fn over(name: &str, inner: MemoryStorage) -> Self {
        Self {
            name: name.to_string(),
            inner,
            offline: Arc::new(AtomicBool::new(false)),
            reject_puts: Arc::new(AtomicBool::new(false)),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            poisoned: Arc::default(),
            capabilities: Capabilities::ALL,
        }
    }

    /// Every async operation sleeps for `delay` first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Fail every `put` while leaving reads and deletes working.
    pub fn set_reject_puts(&self, reject: bool) {
        self.reject_puts.store(reject, Ordering::SeqCst);
    }

    /// Make every operation on `key` fail until [`cure`](Self::cure) is called.
    pub fn poison(&self, key: &str) {
        self.poisoned.lock().unwrap().insert(key.to_string());
    }

    pub fn cure(&self, key: &str) {
        self.poisoned.lock().unwrap().remove(key);
    }

    /// Operations attempted so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn memory(&self) -> &MemoryStorage {
        &self.inner
    }

    fn gate(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.is_offline() {
            Err(Error::backend(format!("{} is offline", self.name)))
        } else {
            Ok(())
        }
    }

    fn gate_key(&self, id: &str) -> Result<()> {
        self.gate()?;
        if self.poisoned.lock().unwrap().contains(id) {
            Err(Error::backend(format!("{} rejected {id}", self.name)))
        } else {
            Ok(())
        }
    }

    fn gate_put(&self, id: &str) -> Result<()> {
        self.gate_key(id)?;
        if self.reject_puts.load(Ordering::SeqCst) {
            Err(Error::backend(format!("{} refused write of {id}", self.name)))
        } else {
            Ok(())
        }
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Storage for FlakyStorage {
    type Id = String;

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn exists(&self, id: &String) -> Result<bool> {
        self.pause().await;
        self.gate_key(id)?;
        Storage::exists(&self.inner, id).await
    }

    async fn put(&self, id: String, data: Vec<u8>) -> Result<()> {
        self.pause().await;
        self.gate_put(&id)?;
        Storage::put(&self.inner, id, data).await
    }

    async fn get(&self, id: &String) -> Result<Vec<u8>> {
        self.pause().await;
        self.gate_key(id)?;
        Storage::get(&self.inner, id).await
    }

    async fn delete(&self, id: &String) -> Result<()> {
        self.pause().await;
        self.gate_key(id)?;
        Storage::delete(&self.inner, id).await
    }

    async fn keys(&self) -> Result<futures::stream::BoxStream<'_, Result<String>>> {
        self.gate()?;
        Storage::keys(&self.inner).await
    }
}

impl BlockingStorage for FlakyStorage {
    type Id = String;

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn exists(&self, id: &String) -> Result<bool> {
        self.gate_key(id)?;
        BlockingStorage::exists(&self.inner, id)
    }

    fn put(&self, id: String, data: Vec<u8>) -> Result<()> {
        self.gate_put(&id)?;
        BlockingStorage::put(&self.inner, id, data)
    }

    fn get(&self, id: &String) -> Result<Vec<u8>> {
        self.gate_key(id)?;
        BlockingStorage::get(&self.inner, id)
    }

    fn delete(&self, id: &String) -> Result<()> {
        self.gate_key(id)?;
        BlockingStorage::delete(&self.inner, id)
    }

    fn keys(&self) -> Result<BoxIter<'_, Result<String>>> {
        self.gate()?;
        BlockingStorage::keys(&self.inner)
    }
}
