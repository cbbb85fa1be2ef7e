//! Sequential reconciliation.
//!
//! Same contracts as [`multi::reconcile`](crate::multi::reconcile), one key at
//! a time in listing order. The `concurrency` fields of the options are
//! ignored.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

use super::BlockingStorage;
use crate::multi::reconcile::CLEARABLE;
use crate::{
    Capabilities, ConflictStrategy, CopyOptions, Error, ReconcileError, ReconcileReport,
    ReconcileResult, SyncOptions,
};

type Abort<Id> = (Option<Id>, Error);

fn abort<Id: Debug>(operation: &str, report: &mut ReconcileReport<Id>, (key, source): Abort<Id>) -> ReconcileError<Id> {
    tracing::error!(
        operation,
        ?key,
        error = %source,
        copied = report.copied_count(),
        deleted = report.deleted_count(),
        "Reconcile aborted"
    );
    ReconcileError::new(key, std::mem::take(report), source)
}

fn check_transfer<S1, S2>(source: &S1, dest: &S2, operation: &str) -> crate::Result<()>
where
    S1: BlockingStorage,
    S2: BlockingStorage<Id = S1::Id>,
{
    let needed_source = Capabilities {
        writable: false,
        ..Capabilities::ALL
    };
    source.capabilities().require(needed_source, operation)?;
    dest.capabilities().require(
        Capabilities {
            writable: true,
            ..Capabilities::NONE
        },
        operation,
    )
}

fn copy_phase<S1, S2>(
    source: &S1,
    dest: &S2,
    conflict: ConflictStrategy,
    report: &mut ReconcileReport<S1::Id>,
) -> Result<(), Abort<S1::Id>>
where
    S1: BlockingStorage,
    S2: BlockingStorage<Id = S1::Id>,
{
    for listed in source.keys().map_err(|e| (None, e))? {
        let id = listed.map_err(|e| (None, e))?;

        if conflict == ConflictStrategy::Skip {
            match dest.exists(&id) {
                Ok(true) => {
                    report.skipped.push(id);
                    continue;
                }
                Ok(false) => {}
                Err(e) => return Err((Some(id), e)),
            }
        }

        let copied = source
            .get(&id)
            .and_then(|data| dest.put(id.clone(), data));
        match copied {
            Ok(()) => report.copied.push(id),
            Err(e) => return Err((Some(id), e)),
        }
    }
    Ok(())
}

fn delete_tolerant<S: BlockingStorage>(store: &S, id: &S::Id) -> crate::Result<()> {
    match store.delete(id) {
        Ok(()) | Err(Error::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Copy every object of `source` into `dest` without deleting anything.
pub fn copy_store<S1, S2>(source: &S1, dest: &S2, options: CopyOptions) -> ReconcileResult<S1::Id>
where
    S1: BlockingStorage,
    S2: BlockingStorage<Id = S1::Id>,
{
    check_transfer(source, dest, "copy_store").map_err(ReconcileError::setup)?;

    let mut report = ReconcileReport::default();
    copy_phase(source, dest, options.conflict, &mut report)
        .map_err(|failure| abort("copy_store", &mut report, failure))?;

    tracing::info!(
        copied = report.copied_count(),
        skipped = report.skipped_count(),
        "Copy complete"
    );
    Ok(report)
}

/// Make `dest` hold exactly the objects of `source`; copies happen before deletes.
pub fn sync_stores<S1, S2>(source: &S1, dest: &S2, options: SyncOptions) -> ReconcileResult<S1::Id>
where
    S1: BlockingStorage,
    S2: BlockingStorage<Id = S1::Id>,
    S1::Id: Hash + Eq,
{
    check_transfer(source, dest, "sync_stores").map_err(ReconcileError::setup)?;

    let mut extras = HashSet::new();
    if options.delete_extras {
        dest.capabilities()
            .require(Capabilities::ALL, "sync_stores")
            .map_err(ReconcileError::setup)?;
        for id in dest.keys().map_err(ReconcileError::setup)? {
            extras.insert(id.map_err(ReconcileError::setup)?);
        }
    }

    let mut report = ReconcileReport::default();
    copy_phase(source, dest, ConflictStrategy::Overwrite, &mut report)
        .map_err(|failure| abort("sync_stores", &mut report, failure))?;

    if options.delete_extras {
        for id in &report.copied {
            extras.remove(id);
        }
        for id in extras {
            if let Err(e) = delete_tolerant(dest, &id) {
                return Err(abort("sync_stores", &mut report, (Some(id), e)));
            }
            report.deleted.push(id);
        }
    }

    tracing::info!(
        copied = report.copied_count(),
        deleted = report.deleted_count(),
        "Sync complete"
    );
    Ok(report)
}

/// Delete every object in `store`. Keys are collected before the first delete.
pub fn clear_store<S: BlockingStorage>(store: &S) -> ReconcileResult<S::Id> {
    store
        .capabilities()
        .require(CLEARABLE, "clear_store")
        .map_err(ReconcileError::setup)?;

    let ids: Vec<S::Id> = store
        .keys()
        .map_err(ReconcileError::setup)?
        .collect::<crate::Result<_>>()
        .map_err(ReconcileError::setup)?;

    let mut report = ReconcileReport::default();
    for id in ids {
        if let Err(e) = delete_tolerant(store, &id) {
            return Err(abort("clear_store", &mut report, (Some(id), e)));
        }
        report.deleted.push(id);
    }

    tracing::info!(deleted = report.deleted_count(), "Clear complete");
    Ok(report)
}
