use crate::{
    Capabilities, Error, MirrorFailureDetails, MirrorOp, Result, Storage, TargetFailure,
};
use futures::StreamExt;
use futures::stream::{BoxStream, FuturesUnordered};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing;

/// Mirrors every mutation across an ordered set of targets.
///
/// - `put` and `delete` are dispatched to all targets concurrently, one tokio
///   task per target, and the call waits for every target before returning.
///   A failing target never blocks the healthy ones; if any target failed,
///   the call returns [`Error::Aggregate`] naming each failed target.
/// - `get`, `exists` and `keys` are served by the primary target only. Reads
///   never compare targets against each other.
///
/// Dispatched target writes always run to completion. If the caller stops
/// waiting, either through [`put_cancellable`](Self::put_cancellable) or by
/// dropping the future, the remaining target operations keep running in the
/// background.
///
/// Requires a tokio runtime.
#[derive(Debug)]
pub struct MirrorStorage<S: Storage + 'static> {
    backends: Vec<Arc<S>>,
    names: Vec<String>,
    backend_timeout: Option<Duration>,
    primary_index: usize,
    capabilities: Capabilities,
}

impl<S: Storage + 'static> MirrorStorage<S> {
    /// Create a builder for configuring mirror storage.
    pub fn builder() -> MirrorStorageBuilder<S> {
        MirrorStorageBuilder::new()
    }

    /// Create a mirror over `backends` with the first one as primary.
    pub fn new(backends: Vec<S>) -> Result<Self> {
        backends
            .into_iter()
            .fold(Self::builder(), |builder, backend| builder.add_backend(backend))
            .build()
    }

    /// Get the number of targets.
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Get the per-target timeout.
    pub fn backend_timeout(&self) -> Option<Duration> {
        self.backend_timeout
    }

    /// Get a reference to a specific target by index.
    pub fn backend(&self, index: usize) -> Option<&S> {
        self.backends.get(index).map(|arc| arc.as_ref())
    }

    /// Get the display name of a target.
    pub fn backend_name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Index of the target serving reads.
    pub fn primary_index(&self) -> usize {
        self.primary_index
    }

    /// Get the primary target (used for reads).
    pub fn primary(&self) -> &S {
        self.backends[self.primary_index].as_ref()
    }

    /// Store an item on every target, giving up waiting once `cancel` fires.
    ///
    /// On cancellation the returned [`Error::Aggregate`] lists the targets
    /// that had already finished and those still pending; pending writes
    /// continue in the background.
    pub async fn put_cancellable(
        &self,
        id: S::Id,
        data: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.fan_out(MirrorOp::Put, &id, Some(cancel), |backend| {
            let id = id.clone();
            let data = data.clone();
            async move { backend.put(id, data).await }
        })
        .await
    }

    /// Delete an item from every target, giving up waiting once `cancel` fires.
    pub async fn delete_cancellable(&self, id: &S::Id, cancel: &CancellationToken) -> Result<()> {
        self.fan_out(MirrorOp::Delete, id, Some(cancel), |backend| {
            let id = id.clone();
            async move { backend.delete(&id).await }
        })
        .await
    }

    /// Run `op` against every target on its own task and aggregate the outcomes.
    async fn fan_out<F, Fut>(
        &self,
        operation: MirrorOp,
        id: &S::Id,
        cancel: Option<&CancellationToken>,
        op: F,
    ) -> Result<()>
    where
        F: Fn(Arc<S>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let timeout = self.backend_timeout;

        let handles: Vec<JoinHandle<Result<()>>> = self
            .backends
            .iter()
            .enumerate()
            .map(|(idx, backend)| {
                let target_op = op(Arc::clone(backend));
                let task_id = id.clone();
                tokio::spawn(async move {
                    let result = target_op.await;
                    if let Err(e) = &result {
                        tracing::warn!(id = ?task_id, backend_index = idx, error = %e, "Mirror target failed");
                    }
                    result
                })
            })
            .collect();

        // The timeout only stops the wait; dropping a handle detaches its task.
        let mut in_flight: FuturesUnordered<_> = handles
            .into_iter()
            .enumerate()
            .map(|(idx, handle)| async move {
                let joined = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, handle).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            return (
                                idx,
                                Err(Error::backend(format!(
                                    "target timed out after {limit:?}, write left running"
                                ))),
                            );
                        }
                    },
                    None => handle.await,
                };
                let outcome = joined.unwrap_or_else(|e| {
                    Err(Error::backend(format!("mirror target task failed: {e}")))
                });
                (idx, outcome)
            })
            .collect();

        let mut outcomes: Vec<Option<Result<()>>> = (0..self.backends.len()).map(|_| None).collect();

        loop {
            let next = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    next = in_flight.next() => Some(next),
                    _ = token.cancelled() => None,
                },
                None => Some(in_flight.next().await),
            };

            let Some(next) = next else {
                tracing::warn!(
                    ?id,
                    %operation,
                    pending = in_flight.len(),
                    "Mirror fan-out cancelled, pending targets continue in background"
                );
                break;
            };
            let Some((idx, outcome)) = next else {
                break;
            };
            outcomes[idx] = Some(outcome);
        }

        let mut details = MirrorFailureDetails::new(operation);
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Some(Ok(())) => details.successes.push(index),
                Some(Err(error)) => details.failures.push(TargetFailure {
                    index,
                    name: self.names[index].clone(),
                    error: Box::new(error),
                }),
                None => details.pending.push(index),
            }
        }

        if !details.has_failures() && !details.was_cancelled() {
            return Ok(());
        }

        tracing::error!(
            ?id,
            %operation,
            success_count = details.success_count(),
            failure_count = details.failure_count(),
            pending_count = details.pending_count(),
            failed = ?details.failed_names(),
            "Mirror operation did not complete on every target"
        );
        Err(Error::Aggregate(details))
    }
}

impl<S: Storage + 'static> Storage for MirrorStorage<S> {
    type Id = S::Id;

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn exists(&self, id: &Self::Id) -> Result<bool> {
        self.primary().exists(id).await
    }

    async fn put(&self, id: Self::Id, data: Vec<u8>) -> Result<()> {
        self.fan_out(MirrorOp::Put, &id, None, |backend| {
            let id = id.clone();
            let data = data.clone();
            async move { backend.put(id, data).await }
        })
        .await
    }

    async fn get(&self, id: &Self::Id) -> Result<Vec<u8>> {
        self.primary().get(id).await
    }

    async fn delete(&self, id: &Self::Id) -> Result<()> {
        self.fan_out(MirrorOp::Delete, id, None, |backend| {
            let id = id.clone();
            async move { backend.delete(&id).await }
        })
        .await
    }

    async fn keys(&self) -> Result<BoxStream<'_, Result<Self::Id>>> {
        self.primary().keys().await
    }

    async fn open(&self) -> Result<()> {
        for backend in &self.backends {
            backend.open().await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut first_error = None;
        for (idx, backend) in self.backends.iter().enumerate() {
            if let Err(e) = backend.close().await {
                tracing::warn!(backend_index = idx, error = %e, "Mirror target failed to close");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Builder for [`MirrorStorage`].
pub struct MirrorStorageBuilder<S: Storage + 'static> {
    backends: Vec<(Option<String>, S)>,
    backend_timeout: Option<Duration>,
    primary_index: usize,
}

impl<S: Storage + 'static> MirrorStorageBuilder<S> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            backend_timeout: None,
            primary_index: 0,
        }
    }

    /// Add a target named `target-<index>`.
    pub fn add_backend(mut self, backend: S) -> Self {
        self.backends.push((None, backend));
        self
    }

    /// Add a target with a display name used in error reports.
    pub fn add_named_backend(mut self, name: impl Into<String>, backend: S) -> Self {
        self.backends.push((Some(name.into()), backend));
        self
    }

    /// Set per-target timeout (default: None). A timed-out target counts as
    /// failed, but its write is left running.
    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = Some(timeout);
        self
    }

    /// Set primary target index for reads (default: 0).
    pub fn primary_index(mut self, index: usize) -> Self {
        self.primary_index = index;
        self
    }

    /// Build the mirror storage.
    ///
    /// Fails with [`Error::Config`] when no target was added or the primary
    /// index is out of range.
    pub fn build(self) -> Result<MirrorStorage<S>> {
        if self.backends.is_empty() {
            return Err(Error::Config(
                "MirrorStorage requires at least one backend".to_string(),
            ));
        }
        if self.primary_index >= self.backends.len() {
            return Err(Error::Config(format!(
                "Primary index {} out of bounds (have {} backends)",
                self.primary_index,
                self.backends.len()
            )));
        }

        let primary_caps = self.backends[self.primary_index].1.capabilities();
        let all_writable = self
            .backends
            .iter()
            .all(|(_, backend)| backend.capabilities().writable);
        let capabilities = Capabilities {
            writable: all_writable,
            ..primary_caps
        };

        let (names, backends) = self
            .backends
            .into_iter()
            .enumerate()
            .map(|(idx, (name, backend))| {
                (
                    name.unwrap_or_else(|| format!("target-{idx}")),
                    Arc::new(backend),
                )
            })
            .unzip();

        Ok(MirrorStorage {
            backends,
            names,
            backend_timeout: self.backend_timeout,
            primary_index: self.primary_index,
            capabilities,
        })
    }
}

impl<S: Storage + 'static> Default for MirrorStorageBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Storage + 'static> Debug for MirrorStorageBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorStorageBuilder")
            .field("backend_count", &self.backends.len())
            .field("backend_timeout", &self.backend_timeout)
            .field("primary_index", &self.primary_index)
            .finish()
    }
}
