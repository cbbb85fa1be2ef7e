//! Whole-store reconciliation.
//!
//! [`copy_store`] pushes every object of a source into a destination without
//! ever deleting, [`sync_stores`] makes the destination hold exactly what the
//! source holds, and [`clear_store`] empties a store.
//!
//! All three abort on the first failure. The returned [`ReconcileError`]
//! carries the [`ReconcileReport`] of everything finished before the abort, so
//! a caller can tell how far the run got and simply re-run it: every
//! operation here is idempotent.
//!
//! # Example
//!
//! ```rust
//! # #[cfg(feature = "memory")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use stowage_compose::{MemoryStorage, StorageExt, SyncOptions};
//! use stowage_compose::multi::reconcile::sync_stores;
//!
//! let source = MemoryStorage::new();
//! let dest = MemoryStorage::new();
//!
//! source.put_bytes("x".to_string(), b"1").await?;
//! dest.put_bytes("stale".to_string(), b"0").await?;
//!
//! let report = sync_stores(&source, &dest, SyncOptions::default()).await?;
//! println!("{report}"); // "Reconcile: 1 copied, 0 skipped, 1 deleted"
//! assert_eq!(dest.contents().len(), 1);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::fmt::{self, Debug};
use std::hash::Hash;

use futures::StreamExt as _;

use crate::{Capabilities, Error, Storage};

/// Determines what a copy does when the key already exists at the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Replace the destination object. This is the default.
    #[default]
    Overwrite,

    /// Leave the destination object untouched and record the key as skipped.
    Skip,
}

/// Options for [`copy_store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// How to handle keys already present at the destination.
    ///
    /// Default: [`ConflictStrategy::Overwrite`].
    pub conflict: ConflictStrategy,

    /// Maximum number of keys in flight at once. Values of 0 are clamped to 1.
    /// Ignored by the blocking variant. Default: `1`.
    pub concurrency: usize,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            conflict: ConflictStrategy::Overwrite,
            concurrency: 1,
        }
    }
}

/// Options for [`sync_stores`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Delete destination keys the source does not have.
    ///
    /// `true` (the default) makes the destination an exact replica; `false`
    /// only adds and overwrites.
    pub delete_extras: bool,

    /// Maximum number of keys in flight at once. Values of 0 are clamped to 1.
    /// Ignored by the blocking variant. Default: `1`.
    pub concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            delete_extras: true,
            concurrency: 1,
        }
    }
}

/// What a reconciliation run did, key by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport<Id> {
    /// Keys written to the destination.
    pub copied: Vec<Id>,

    /// Keys left alone because they already existed
    /// (only with [`ConflictStrategy::Skip`]).
    pub skipped: Vec<Id>,

    /// Keys removed from the destination (or from the cleared store).
    pub deleted: Vec<Id>,
}

impl<Id> Default for ReconcileReport<Id> {
    fn default() -> Self {
        Self {
            copied: Vec::new(),
            skipped: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<Id> ReconcileReport<Id> {
    pub fn copied_count(&self) -> usize {
        self.copied.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    /// True when the run changed nothing.
    pub fn is_noop(&self) -> bool {
        self.copied.is_empty() && self.deleted.is_empty()
    }
}

impl<Id> fmt::Display for ReconcileReport<Id> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Reconcile: {} copied, {} skipped, {} deleted",
            self.copied_count(),
            self.skipped_count(),
            self.deleted_count()
        )
    }
}

/// A reconciliation run that stopped early.
#[derive(Debug)]
pub struct ReconcileError<Id> {
    /// The key being processed when the run stopped, if the failure was tied
    /// to one (capability and listing failures are not).
    pub key: Option<Id>,

    /// Everything completed before the failure.
    pub progress: ReconcileReport<Id>,

    /// The underlying failure.
    pub source: Error,
}

impl<Id> ReconcileError<Id> {
    pub(crate) fn new(key: Option<Id>, progress: ReconcileReport<Id>, source: Error) -> Self {
        Self {
            key,
            progress,
            source,
        }
    }

    /// Failure before any key was touched.
    pub(crate) fn setup(source: Error) -> Self {
        Self::new(None, ReconcileReport::default(), source)
    }

    /// Convert into the plain storage error, dropping the progress report.
    pub fn into_source(self) -> Error {
        self.source
    }
}

impl<Id: Debug> fmt::Display for ReconcileError<Id> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "Reconcile aborted at {key:?}: {}", self.source)?,
            None => write!(f, "Reconcile aborted: {}", self.source)?,
        }
        write!(
            f,
            " (after {} copied, {} skipped, {} deleted)",
            self.progress.copied_count(),
            self.progress.skipped_count(),
            self.progress.deleted_count()
        )
    }
}

impl<Id: Debug> std::error::Error for ReconcileError<Id> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Result of a reconciliation run.
pub type ReconcileResult<Id> = std::result::Result<ReconcileReport<Id>, ReconcileError<Id>>;

enum ItemOutcome<Id> {
    Copied(Id),
    Skipped(Id),
    Deleted(Id),
    Failed(Id, Error),
}

impl<Id> ItemOutcome<Id> {
    /// Record the outcome, or hand back the failure.
    fn record(self, report: &mut ReconcileReport<Id>) -> Option<(Id, Error)> {
        match self {
            ItemOutcome::Copied(id) => report.copied.push(id),
            ItemOutcome::Skipped(id) => report.skipped.push(id),
            ItemOutcome::Deleted(id) => report.deleted.push(id),
            ItemOutcome::Failed(id, e) => return Some((id, e)),
        }
        None
    }
}

async fn copy_one<S1, S2>(source: &S1, dest: &S2, id: S1::Id, conflict: ConflictStrategy) -> ItemOutcome<S1::Id>
where
    S1: Storage,
    S2: Storage<Id = S1::Id>,
{
    if conflict == ConflictStrategy::Skip {
        match dest.exists(&id).await {
            Ok(true) => {
                tracing::debug!(?id, "Skipping: item already exists at destination");
                return ItemOutcome::Skipped(id);
            }
            Ok(false) => {}
            Err(e) => return ItemOutcome::Failed(id, e),
        }
    }

    let data = match source.get(&id).await {
        Ok(data) => data,
        Err(e) => return ItemOutcome::Failed(id, e),
    };
    match dest.put(id.clone(), data).await {
        Ok(()) => ItemOutcome::Copied(id),
        Err(e) => ItemOutcome::Failed(id, e),
    }
}

async fn delete_one<S: Storage>(store: &S, id: S::Id) -> ItemOutcome<S::Id> {
    match store.delete(&id).await {
        Ok(()) => ItemOutcome::Deleted(id),
        // A strict store reporting the key gone is as good as a delete.
        Err(Error::NotFound(_)) => ItemOutcome::Deleted(id),
        Err(e) => ItemOutcome::Failed(id, e),
    }
}

/// Stream every source key through `copy_one`, `concurrency` at a time.
async fn copy_phase<S1, S2>(
    source: &S1,
    dest: &S2,
    conflict: ConflictStrategy,
    concurrency: usize,
    report: &mut ReconcileReport<S1::Id>,
) -> std::result::Result<(), (Option<S1::Id>, Error)>
where
    S1: Storage,
    S2: Storage<Id = S1::Id>,
{
    let listing = source.keys().await.map_err(|e| (None, e))?;

    let mut outcomes = listing
        .map(|listed| async move {
            match listed {
                Ok(id) => Ok(copy_one(source, dest, id, conflict).await),
                Err(e) => Err(e),
            }
        })
        .buffer_unordered(concurrency.max(1));

    while let Some(outcome) = outcomes.next().await {
        let outcome = outcome.map_err(|e| (None, e))?;
        if let Some((id, e)) = outcome.record(report) {
            return Err((Some(id), e));
        }
    }
    Ok(())
}

fn abort<Id: Debug>(
    operation: &str,
    report: &mut ReconcileReport<Id>,
    key: Option<Id>,
    source: Error,
) -> ReconcileError<Id> {
    tracing::error!(
        operation,
        ?key,
        error = %source,
        copied = report.copied_count(),
        skipped = report.skipped_count(),
        deleted = report.deleted_count(),
        "Reconcile aborted"
    );
    ReconcileError::new(key, std::mem::take(report), source)
}

/// Copy every object of `source` into `dest`. Never deletes anything.
///
/// Requires a readable, enumerable source and a writable destination;
/// otherwise fails with [`Error::Unsupported`] before touching any key.
pub async fn copy_store<S1, S2>(source: &S1, dest: &S2, options: CopyOptions) -> ReconcileResult<S1::Id>
where
    S1: Storage,
    S2: Storage<Id = S1::Id>,
{
    let CopyOptions {
        conflict,
        concurrency,
    } = options;

    check_transfer(source, dest, "copy_store").map_err(ReconcileError::setup)?;

    let mut report = ReconcileReport::default();
    if let Err((key, e)) = copy_phase(source, dest, conflict, concurrency, &mut report).await {
        return Err(abort("copy_store", &mut report, key, e));
    }

    tracing::info!(
        copied = report.copied_count(),
        skipped = report.skipped_count(),
        "Copy complete"
    );
    Ok(report)
}

/// Make `dest` hold exactly the objects of `source`.
///
/// Every source object is copied (overwriting) before anything is deleted, so
/// an aborted run never leaves `dest` missing an object it should have
/// gained. With [`SyncOptions::delete_extras`] the destination must also be
/// enumerable. Running a sync twice in a row changes nothing the second time
/// except rewriting identical objects.
pub async fn sync_stores<S1, S2>(source: &S1, dest: &S2, options: SyncOptions) -> ReconcileResult<S1::Id>
where
    S1: Storage,
    S2: Storage<Id = S1::Id>,
    S1::Id: Hash + Eq,
{
    let SyncOptions {
        delete_extras,
        concurrency,
    } = options;

    check_transfer(source, dest, "sync_stores").map_err(ReconcileError::setup)?;
    if delete_extras {
        dest.capabilities()
            .require(Capabilities::ALL, "sync_stores")
            .map_err(ReconcileError::setup)?;
    }

    // Snapshot the destination before writing so the copy phase cannot
    // disturb the listing.
    let mut extras: HashSet<S1::Id> = HashSet::new();
    if delete_extras {
        let listing = dest.keys().await.map_err(ReconcileError::setup)?;
        let listed: Vec<crate::Result<S1::Id>> = listing.collect().await;
        for id in listed {
            extras.insert(id.map_err(ReconcileError::setup)?);
        }
    }

    let mut report = ReconcileReport::default();
    if let Err((key, e)) = copy_phase(
        source,
        dest,
        ConflictStrategy::Overwrite,
        concurrency,
        &mut report,
    )
    .await
    {
        return Err(abort("sync_stores", &mut report, key, e));
    }

    if delete_extras {
        for id in &report.copied {
            extras.remove(id);
        }

        let mut outcomes = futures::stream::iter(extras)
            .map(|id| delete_one(dest, id))
            .buffer_unordered(concurrency.max(1));
        while let Some(outcome) = outcomes.next().await {
            if let Some((id, e)) = outcome.record(&mut report) {
                return Err(abort("sync_stores", &mut report, Some(id), e));
            }
        }
    }

    tracing::info!(
        copied = report.copied_count(),
        deleted = report.deleted_count(),
        "Sync complete"
    );
    Ok(report)
}

/// What [`clear_store`] needs: listing and deleting, never reading values.
pub(crate) const CLEARABLE: Capabilities = Capabilities {
    readable: false,
    writable: true,
    enumerable: true,
};

/// Delete every object in `store`.
///
/// Requires a writable and enumerable store. Keys are collected
/// before the first delete. A `NotFound` from a strict store counts as
/// already cleared.
pub async fn clear_store<S: Storage>(store: &S) -> ReconcileResult<S::Id> {
    store
        .capabilities()
        .require(CLEARABLE, "clear_store")
        .map_err(ReconcileError::setup)?;

    let ids: Vec<crate::Result<S::Id>> = store
        .keys()
        .await
        .map_err(ReconcileError::setup)?
        .collect()
        .await;

    let mut report = ReconcileReport::default();
    for id in ids {
        let id = match id {
            Ok(id) => id,
            Err(e) => return Err(abort("clear_store", &mut report, None, e)),
        };
        if let Some((id, e)) = delete_one(store, id).await.record(&mut report) {
            return Err(abort("clear_store", &mut report, Some(id), e));
        }
    }

    tracing::info!(deleted = report.deleted_count(), "Clear complete");
    Ok(report)
}

fn check_transfer<S1, S2>(source: &S1, dest: &S2, operation: &str) -> crate::Result<()>
where
    S1: Storage,
    S2: Storage<Id = S1::Id>,
{
    source.capabilities().require(
        Capabilities {
            readable: true,
            writable: false,
            enumerable: true,
        },
        operation,
    )?;
    dest.capabilities().require(
        Capabilities {
            readable: false,
            writable: true,
            enumerable: false,
        },
        operation,
    )
}
