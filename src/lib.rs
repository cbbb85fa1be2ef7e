use std::fmt::{self, Debug};
use std::future::Future;
use std::hash::Hash;

use futures::stream::BoxStream;

#[cfg(feature = "local")]
pub use adapters::local::LocalStorage;
#[cfg(feature = "memory")]
pub use adapters::memory::MemoryStorage;

pub use adapters::multi;
pub use adapters::multi::reconcile::{
    ConflictStrategy, CopyOptions, ReconcileError, ReconcileReport, ReconcileResult, SyncOptions,
};
pub use dynamic::{DynStorage, SharedStorage, shared};

pub mod blocking;
pub mod dynamic;
#[cfg(feature = "config")]
pub mod graph;

/// A specialized Result type for Storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The subset of {readable, writable, enumerable} a store supports.
///
/// Every store reports its capabilities at construction time. Decorators
/// derive theirs from their children and may narrow, but never widen, what
/// they wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capabilities {
    pub readable: bool,
    pub writable: bool,
    pub enumerable: bool,
}

impl Capabilities {
    /// Readable, writable and enumerable.
    pub const ALL: Self = Self {
        readable: true,
        writable: true,
        enumerable: true,
    };

    /// Readable and writable, without key listing.
    pub const READ_WRITE: Self = Self {
        readable: true,
        writable: true,
        enumerable: false,
    };

    /// Readable only.
    pub const READ_ONLY: Self = Self {
        readable: true,
        writable: false,
        enumerable: false,
    };

    /// Nothing at all.
    pub const NONE: Self = Self {
        readable: false,
        writable: false,
        enumerable: false,
    };

    /// Capabilities shared by both sets.
    pub fn intersect(self, other: Self) -> Self {
        Self {
            readable: self.readable && other.readable,
            writable: self.writable && other.writable,
            enumerable: self.enumerable && other.enumerable,
        }
    }

    /// Returns true if every capability in `needed` is present.
    pub fn contains(self, needed: Self) -> bool {
        self.intersect(needed) == needed
    }

    /// Same set with writes removed.
    pub fn without_writes(self) -> Self {
        Self {
            writable: false,
            ..self
        }
    }

    /// Fail with [`Error::Unsupported`] unless every capability in `needed` is present.
    pub fn require(self, needed: Self, operation: &str) -> Result<()> {
        if self.contains(needed) {
            Ok(())
        } else {
            Err(Error::Unsupported(format!(
                "{operation} requires a store with capabilities [{needed}], got [{self}]"
            )))
        }
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |on: bool, c: char| if on { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(self.readable, 'r'),
            flag(self.writable, 'w'),
            flag(self.enumerable, 'e')
        )
    }
}

/// The mutation a mirror fan-out was performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOp {
    Put,
    Delete,
}

impl fmt::Display for MirrorOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorOp::Put => f.write_str("put"),
            MirrorOp::Delete => f.write_str("delete"),
        }
    }
}

/// A single mirror target that failed, with the error it reported.
#[derive(Debug)]
pub struct TargetFailure {
    /// Position of the target in the mirror.
    pub index: usize,
    /// Display name of the target.
    pub name: String,
    /// What went wrong.
    pub error: Box<Error>,
}

/// Details about a mirror operation that did not succeed everywhere.
///
/// The operation has already been attempted on every target; this lists
/// which targets succeeded, which failed and why, and which were still in
/// flight when the caller cancelled.
///
/// ```
/// # use stowage_compose::{Error, MemoryStorage, StorageExt};
/// # use stowage_compose::multi::MirrorStorage;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = MirrorStorage::builder()
///     .add_named_backend("eu", MemoryStorage::new())
///     .add_named_backend("us", MemoryStorage::new())
///     .build()?;
///
/// match storage.put_bytes("file.txt".to_string(), b"data").await {
///     Err(Error::Aggregate(details)) => {
///         for failure in &details.failures {
///             eprintln!("{} failed: {}", failure.name, failure.error);
///         }
///     }
///     other => other?,
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MirrorFailureDetails {
    /// The mutation that was fanned out.
    pub operation: MirrorOp,
    /// Indices of targets that succeeded
    pub successes: Vec<usize>,
    /// Targets that failed
    pub failures: Vec<TargetFailure>,
    /// Indices of targets still running when cancellation was observed
    pub pending: Vec<usize>,
}

impl MirrorFailureDetails {
    pub(crate) fn new(operation: MirrorOp) -> Self {
        Self {
            operation,
            successes: Vec::new(),
            failures: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Total number of targets involved
    pub fn total_backends(&self) -> usize {
        self.successes.len() + self.failures.len() + self.pending.len()
    }

    /// Number of successful targets
    pub fn success_count(&self) -> usize {
        self.successes.len()
    }

    /// Number of failed targets
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Number of targets whose outcome was not yet known
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_successes(&self) -> bool {
        !self.successes.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// True when the caller cancelled before every target reported back.
    pub fn was_cancelled(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Get indices of all failed targets
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }

    /// Get names of all failed targets
    pub fn failed_names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.name.as_str()).collect()
    }

    /// Get indices of all successful targets
    pub fn successful_indices(&self) -> &[usize] {
        &self.successes
    }

    /// The error reported by the target at `index`, if it failed.
    pub fn failure_for(&self, index: usize) -> Option<&Error> {
        self.failures
            .iter()
            .find(|f| f.index == index)
            .map(|f| f.error.as_ref())
    }
}

impl fmt::Display for MirrorFailureDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Mirror {} failed on {} of {} targets",
            self.operation,
            self.failure_count(),
            self.total_backends()
        )?;
        if self.has_failures() {
            let names: Vec<String> = self
                .failures
                .iter()
                .map(|t| format!("{}: {}", t.name, t.error))
                .collect();
            write!(f, " ({})", names.join("; "))?;
        }
        if self.was_cancelled() {
            write!(f, ", {} still pending after cancellation", self.pending_count())?;
        }
        Ok(())
    }
}

/// A unified Error type for storage operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("{0}")]
    Aggregate(MirrorFailureDetails),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a [`Error::Backend`] from a plain message.
    pub fn backend(message: impl Into<String>) -> Self {
        Error::Backend(message.into().into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Backend(Box::new(e))
    }
}

/// Adapter modules, gated behind Cargo features.
pub mod adapters {
    #[cfg(feature = "local")]
    pub mod local;
    #[cfg(feature = "memory")]
    pub mod memory;
    pub mod multi;
}

/// The core storage trait.
///
/// Objects are opaque byte sequences stored under a key of type `Id`.
/// Every backend and every composite implements this trait, so composition is
/// recursive: a caching store may front a mirror, which may mirror another
/// cache.
///
/// ## Contracts
/// - `put` then `get` on the same store returns what was written.
/// - `get` fails with [`Error::NotFound`] for a missing key.
/// - `delete` of a missing key is backend-declared: idempotent stores return
///   `Ok(())`, strict stores return [`Error::NotFound`].
/// - `exists` never fails with `NotFound`.
/// - `keys` is only available on enumerable stores. It yields a lazy,
///   forward-only stream; calling it again re-issues the backend listing.
///
/// The returned futures are `Send` so composites can drive their children on
/// separate tasks.
pub trait Storage: Send + Sync + Debug {
    /// The identifier type for this storage backend.
    type Id: Clone + Debug + Send + Sync + 'static;

    /// Capabilities of this store, fixed at construction.
    fn capabilities(&self) -> Capabilities {
        Capabilities::READ_WRITE
    }

    /// Check if an item exists.
    fn exists(&self, id: &Self::Id) -> impl Future<Output = Result<bool>> + Send;

    /// Store or overwrite an item.
    fn put(&self, id: Self::Id, data: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Retrieve an item.
    fn get(&self, id: &Self::Id) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Delete an item.
    fn delete(&self, id: &Self::Id) -> impl Future<Output = Result<()>> + Send;

    /// List every identifier in the store.
    fn keys(&self) -> impl Future<Output = Result<BoxStream<'_, Result<Self::Id>>>> + Send {
        async { Err(Error::Unsupported("key listing".to_string())) }
    }

    /// Acquire whatever the backend needs before use.
    fn open(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    /// Release whatever [`open`](Self::open) acquired.
    fn close(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Convenience methods built on [`Storage`].
pub trait StorageExt: Storage {
    /// Upload a byte slice.
    fn put_bytes(&self, id: Self::Id, bytes: &[u8]) -> impl Future<Output = Result<()>> + Send {
        self.put(id, bytes.to_vec())
    }

    /// Download an item as a UTF-8 string.
    fn get_string(&self, id: &Self::Id) -> impl Future<Output = Result<String>> + Send {
        async move {
            let bytes = self.get(id).await?;
            String::from_utf8(bytes).map_err(|e| Error::backend(format!("invalid utf-8: {e}")))
        }
    }

    /// Copy a single item from this storage to another.
    fn copy_to<S2: Storage<Id = Self::Id>>(
        &self,
        id: &Self::Id,
        dest: &S2,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            let data = self.get(id).await?;
            dest.put(id.clone(), data).await
        }
    }

    /// Move an item from this storage to another by copying then deleting the source.
    ///
    /// If the copy fails the source item is left untouched.  If the delete fails
    /// after a successful copy, the error is returned and the item exists in
    /// both storages.
    fn move_to<S2: Storage<Id = Self::Id>>(
        &self,
        id: &Self::Id,
        dest: &S2,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.copy_to(id, dest).await?;
            self.delete(id).await
        }
    }

    /// Copy every item of this storage into `dest`.
    ///
    /// See [`multi::reconcile::copy_store`].
    ///
    /// ```rust
    /// # #[cfg(feature = "memory")]
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// use stowage_compose::{CopyOptions, MemoryStorage, StorageExt};
    ///
    /// let source = MemoryStorage::new();
    /// let dest = MemoryStorage::new();
    ///
    /// source.put_bytes("a.txt".to_string(), b"hello").await?;
    /// source.put_bytes("b.txt".to_string(), b"world").await?;
    ///
    /// let report = source.copy_into(&dest, CopyOptions::default()).await?;
    /// assert_eq!(report.copied_count(), 2);
    /// # Ok(())
    /// # }
    /// ```
    fn copy_into<S2: Storage<Id = Self::Id>>(
        &self,
        dest: &S2,
        options: CopyOptions,
    ) -> impl Future<Output = ReconcileResult<Self::Id>> + Send
    where
        Self: Sized,
    {
        adapters::multi::reconcile::copy_store(self, dest, options)
    }

    /// Make `dest` hold exactly the items of this storage.
    ///
    /// See [`multi::reconcile::sync_stores`].
    fn sync_into<S2: Storage<Id = Self::Id>>(
        &self,
        dest: &S2,
        options: SyncOptions,
    ) -> impl Future<Output = ReconcileResult<Self::Id>> + Send
    where
        Self: Sized,
        Self::Id: Hash + Eq,
    {
        adapters::multi::reconcile::sync_stores(self, dest, options)
    }

    /// Delete every item in this storage.
    ///
    /// See [`multi::reconcile::clear_store`].
    fn clear_all(&self) -> impl Future<Output = ReconcileResult<Self::Id>> + Send
    where
        Self: Sized,
    {
        adapters::multi::reconcile::clear_store(self)
    }
}

impl<T: Storage + ?Sized> StorageExt for T {}
