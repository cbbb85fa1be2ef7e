use super::{BlockingStorage, BoxIter};
use crate::{Capabilities, Error, MirrorFailureDetails, MirrorOp, Result, TargetFailure};

/// Sequential twin of [`multi::MirrorStorage`](crate::multi::MirrorStorage).
///
/// Mutations are applied to each target in order. A failing target does not
/// stop the remaining ones; once all have been attempted, any failures are
/// reported together as [`Error::Aggregate`]. Reads go to the primary.
#[derive(Debug)]
pub struct MirrorStorage<S: BlockingStorage> {
    backends: Vec<S>,
    names: Vec<String>,
    primary_index: usize,
    capabilities: Capabilities,
}

impl<S: BlockingStorage> MirrorStorage<S> {
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

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    pub fn backend(&self, index: usize) -> Option<&S> {
        self.backends.get(index)
    }

    pub fn backend_name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn primary(&self) -> &S {
        &self.backends[self.primary_index]
    }

    fn apply_all(&self, operation: MirrorOp, id: &S::Id, op: impl Fn(&S) -> Result<()>) -> Result<()> {
        let mut details = MirrorFailureDetails::new(operation);

        for (index, backend) in self.backends.iter().enumerate() {
            match op(backend) {
                Ok(()) => details.successes.push(index),
                Err(error) => {
                    tracing::warn!(?id, backend_index = index, error = %error, "Mirror target failed");
                    details.failures.push(TargetFailure {
                        index,
                        name: self.names[index].clone(),
                        error: Box::new(error),
                    });
                }
            }
        }

        if details.has_failures() {
            tracing::error!(
                ?id,
                %operation,
                failed = ?details.failed_names(),
                "Mirror operation did not complete on every target"
            );
            return Err(Error::Aggregate(details));
        }
        Ok(())
    }
}

impl<S: BlockingStorage> BlockingStorage for MirrorStorage<S> {
    type Id = S::Id;

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn exists(&self, id: &Self::Id) -> Result<bool> {
        self.primary().exists(id)
    }

    fn put(&self, id: Self::Id, data: Vec<u8>) -> Result<()> {
        self.apply_all(MirrorOp::Put, &id, |backend| {
            backend.put(id.clone(), data.clone())
        })
    }

    fn get(&self, id: &Self::Id) -> Result<Vec<u8>> {
        self.primary().get(id)
    }

    fn delete(&self, id: &Self::Id) -> Result<()> {
        self.apply_all(MirrorOp::Delete, id, |backend| backend.delete(id))
    }

    fn keys(&self) -> Result<BoxIter<'_, Result<Self::Id>>> {
        self.primary().keys()
    }

    fn open(&self) -> Result<()> {
        self.backends.iter().try_for_each(|backend| backend.open())
    }

    fn close(&self) -> Result<()> {
        let mut first_error = None;
        for (idx, backend) in self.backends.iter().enumerate() {
            if let Err(e) = backend.close() {
                tracing::warn!(backend_index = idx, error = %e, "Mirror target failed to close");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Builder for the blocking [`MirrorStorage`].
#[derive(Debug)]
pub struct MirrorStorageBuilder<S: BlockingStorage> {
    backends: Vec<(Option<String>, S)>,
    primary_index: usize,
}

impl<S: BlockingStorage> MirrorStorageBuilder<S> {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            primary_index: 0,
        }
    }

    /// Add a target named `target-<index>`.
    pub fn add_backend(mut self, backend: S) -> Self {
        self.backends.push((None, backend));
        self
    }

    pub fn add_named_backend(mut self, name: impl Into<String>, backend: S) -> Self {
        self.backends.push((Some(name.into()), backend));
        self
    }

    pub fn primary_index(mut self, index: usize) -> Self {
        self.primary_index = index;
        self
    }

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

        let capabilities = Capabilities {
            writable: self.backends.iter().all(|(_, b)| b.capabilities().writable),
            ..self.backends[self.primary_index].1.capabilities()
        };

        let (names, backends) = self
            .backends
            .into_iter()
            .enumerate()
            .map(|(idx, (name, backend))| (name.unwrap_or_else(|| format!("target-{idx}")), backend))
            .unzip();

        Ok(MirrorStorage {
            backends,
            names,
            primary_index: self.primary_index,
            capabilities,
        })
    }
}

impl<S: BlockingStorage> Default for MirrorStorageBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}
