//! Type-erased stores.
//!
//! [`Storage`] returns `impl Future`, so it cannot be used as a trait object.
//! [`DynStorage`] is its object-safe twin, implemented for every
//! `Storage<Id = String>`, and [`SharedStorage`] turns it back into a
//! `Storage`. This is what lets a mirror hold a filesystem store next to an
//! in-memory one, and what the store graph hands out.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::{Capabilities, Result, Storage};

/// Object-safe form of [`Storage`] with `String` identifiers.
pub trait DynStorage: Send + Sync + Debug {
    fn capabilities_dyn(&self) -> Capabilities;

    fn exists_dyn<'a>(&'a self, id: &'a String) -> BoxFuture<'a, Result<bool>>;

    fn put_dyn(&self, id: String, data: Vec<u8>) -> BoxFuture<'_, Result<()>>;

    fn get_dyn<'a>(&'a self, id: &'a String) -> BoxFuture<'a, Result<Vec<u8>>>;

    fn delete_dyn<'a>(&'a self, id: &'a String) -> BoxFuture<'a, Result<()>>;

    fn keys_dyn(&self) -> BoxFuture<'_, Result<BoxStream<'_, Result<String>>>>;

    fn open_dyn(&self) -> BoxFuture<'_, Result<()>>;

    fn close_dyn(&self) -> BoxFuture<'_, Result<()>>;
}

impl<S> DynStorage for S
where
    S: Storage<Id = String>,
{
    fn capabilities_dyn(&self) -> Capabilities {
        Storage::capabilities(self)
    }

    fn exists_dyn<'a>(&'a self, id: &'a String) -> BoxFuture<'a, Result<bool>> {
        Box::pin(Storage::exists(self, id))
    }

    fn put_dyn(&self, id: String, data: Vec<u8>) -> BoxFuture<'_, Result<()>> {
        Box::pin(Storage::put(self, id, data))
    }

    fn get_dyn<'a>(&'a self, id: &'a String) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(Storage::get(self, id))
    }

    fn delete_dyn<'a>(&'a self, id: &'a String) -> BoxFuture<'a, Result<()>> {
        Box::pin(Storage::delete(self, id))
    }

    fn keys_dyn(&self) -> BoxFuture<'_, Result<BoxStream<'_, Result<String>>>> {
        Box::pin(Storage::keys(self))
    }

    fn open_dyn(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(Storage::open(self))
    }

    fn close_dyn(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(Storage::close(self))
    }
}

/// A reference-counted, type-erased store.
///
/// Cloning shares the underlying store, so the same child can sit under
/// several composites.
pub type SharedStorage = Arc<dyn DynStorage>;

/// Erase the concrete type of `storage`.
pub fn shared<S>(storage: S) -> SharedStorage
where
    S: Storage<Id = String> + 'static,
{
    Arc::new(storage)
}

impl Storage for SharedStorage {
    type Id = String;

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities_dyn()
    }

    async fn exists(&self, id: &Self::Id) -> Result<bool> {
        (**self).exists_dyn(id).await
    }

    fn put(&self, id: Self::Id, data: Vec<u8>) -> impl Future<Output = Result<()>> + Send {
        (**self).put_dyn(id, data)
    }

    async fn get(&self, id: &Self::Id) -> Result<Vec<u8>> {
        (**self).get_dyn(id).await
    }

    async fn delete(&self, id: &Self::Id) -> Result<()> {
        (**self).delete_dyn(id).await
    }

    fn keys(&self) -> impl Future<Output = Result<BoxStream<'_, Result<Self::Id>>>> + Send {
        (**self).keys_dyn()
    }

    fn open(&self) -> impl Future<Output = Result<()>> + Send {
        (**self).open_dyn()
    }

    fn close(&self) -> impl Future<Output = Result<()>> + Send {
        (**self).close_dyn()
    }
}
