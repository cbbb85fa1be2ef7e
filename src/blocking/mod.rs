//! Sequential counterparts of the async composition layer.
//!
//! [`BlockingStorage`] carries the same contract as [`Storage`](crate::Storage)
//! but every call runs to completion on the caller's thread. The composites
//! and reconciliation functions in this module have the same semantics as
//! their async twins in [`multi`](crate::multi); they only differ in that
//! multi-target work happens one target at a time, in order.
//!
//! ```
//! # #[cfg(feature = "memory")]
//! # fn example() -> stowage_compose::Result<()> {
//! use stowage_compose::MemoryStorage;
//! use stowage_compose::blocking::{BlockingStorage, CachingStorage};
//!
//! let main = MemoryStorage::new();
//! let storage = CachingStorage::new(main.clone(), MemoryStorage::new())?;
//!
//! storage.put("report.csv".to_string(), b"a,b".to_vec())?;
//! assert_eq!(BlockingStorage::get(&main, &"report.csv".to_string())?, b"a,b");
//! # Ok(())
//! # }
//! ```

use std::fmt::Debug;
use std::sync::Arc;

use crate::{Capabilities, Error, Result};

mod caching;
mod mirror;
pub mod reconcile;

pub use caching::CachingStorage;
pub use mirror::{MirrorStorage, MirrorStorageBuilder};
pub use reconcile::{clear_store, copy_store, sync_stores};

/// A boxed, forward-only iterator.
pub type BoxIter<'a, T> = Box<dyn Iterator<Item = T> + 'a>;

/// The sequential storage trait.
///
/// Contracts match [`Storage`](crate::Storage): read-your-write, `NotFound`
/// on a missing `get`, backend-declared delete policy, and `keys` only on
/// enumerable stores. `keys` returns a fresh iterator on every call.
pub trait BlockingStorage: Debug {
    /// The identifier type for this storage backend.
    type Id: Clone + Debug + 'static;

    /// Capabilities of this store, fixed at construction.
    fn capabilities(&self) -> Capabilities {
        Capabilities::READ_WRITE
    }

    fn exists(&self, id: &Self::Id) -> Result<bool>;

    fn put(&self, id: Self::Id, data: Vec<u8>) -> Result<()>;

    fn get(&self, id: &Self::Id) -> Result<Vec<u8>>;

    fn delete(&self, id: &Self::Id) -> Result<()>;

    fn keys(&self) -> Result<BoxIter<'_, Result<Self::Id>>> {
        Err(Error::Unsupported("key listing".to_string()))
    }

    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl<T: BlockingStorage + ?Sized> BlockingStorage for Arc<T> {
    type Id = T::Id;

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn exists(&self, id: &Self::Id) -> Result<bool> {
        (**self).exists(id)
    }

    fn put(&self, id: Self::Id, data: Vec<u8>) -> Result<()> {
        (**self).put(id, data)
    }

    fn get(&self, id: &Self::Id) -> Result<Vec<u8>> {
        (**self).get(id)
    }

    fn delete(&self, id: &Self::Id) -> Result<()> {
        (**self).delete(id)
    }

    fn keys(&self) -> Result<BoxIter<'_, Result<Self::Id>>> {
        (**self).keys()
    }

    fn open(&self) -> Result<()> {
        (**self).open()
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}
