//! Composite stores built from other stores.
//!
//! Every composite here implements [`Storage`](crate::Storage) itself, so
//! patterns nest freely: a cache can front a mirror whose targets are
//! themselves caches.
//!
//! # Available Patterns
//!
//! - [`CachingStorage`] - serves reads from a fast cache in front of an authoritative store
//! - [`MirrorStorage`] - replicates every mutation across several targets concurrently
//! - [`ReadOnlyStorage`] - exposes a store without its write operations
//! - [`reconcile`] - whole-store copy, sync and clear
//!
//! # Composing Patterns
//!
//! ```no_run
//! # #[cfg(feature = "local")]
//! # async fn example() -> stowage_compose::Result<()> {
//! use stowage_compose::{LocalStorage, MemoryStorage, StorageExt, shared};
//! use stowage_compose::multi::{CachingStorage, MirrorStorage};
//!
//! // Replicate to two disks, then put an in-memory cache in front.
//! let mirror = MirrorStorage::builder()
//!     .add_named_backend("disk-1", shared(LocalStorage::new("/storage-1")))
//!     .add_named_backend("disk-2", shared(LocalStorage::new("/storage-2")))
//!     .build()?;
//!
//! let storage = CachingStorage::new(mirror, shared(MemoryStorage::new()))?;
//! storage.put_bytes("file.txt".to_string(), b"data").await?;
//! # Ok(())
//! # }
//! ```

mod caching;
mod mirror;
mod readonly;
pub mod reconcile;

pub use caching::CachingStorage;
pub use mirror::{MirrorStorage, MirrorStorageBuilder};
pub use readonly::ReadOnlyStorage;
