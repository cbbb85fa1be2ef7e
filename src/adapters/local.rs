use crate::{Capabilities, Error, Result, Storage};
use futures::stream::{self, BoxStream};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tokio::fs::ReadDir;

/// Suffix of in-progress writes; files carrying it are never listed.
const TMP_SUFFIX: &str = ".stowage-tmp";

/// A local filesystem store.
///
/// - `Id` is a `String` holding a *relative* object path (e.g. `"foo/bar.txt"`).
/// - All objects are stored under a configured root directory.
/// - Keys that are absolute or contain `..` are rejected with
///   [`Error::Unsupported`].
/// - Writes land in a temporary sibling file first and are renamed into place.
/// - Deletes are idempotent; listing walks the tree lazily.
#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl fmt::Debug for LocalStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStorage")
            .field("root", &self.root)
            .finish()
    }
}

impl LocalStorage {
    /// Create a new local storage rooted at `root`.
    ///
    /// The directory is created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Return the configured root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn validate_id(id: &str) -> Result<()> {
        let reject = |why: &str| Err(Error::Unsupported(format!("invalid local key {id:?}: {why}")));

        if id.is_empty() {
            return reject("key cannot be empty");
        }
        if id.ends_with(TMP_SUFFIX) {
            return reject("reserved suffix");
        }

        let p = Path::new(id);
        if p.is_absolute() {
            return reject("absolute paths are not allowed");
        }

        // `components()` drops interior `.` segments, so check the raw text.
        // A `.` segment would let two keys name the same file.
        if id.split(std::path::is_separator).any(|segment| segment == ".") {
            return reject("'.' is not allowed");
        }

        for c in p.components() {
            match c {
                Component::ParentDir => return reject("'..' is not allowed"),
                // Windows drive prefixes like C:\
                Component::Prefix(_) | Component::RootDir => {
                    return reject("rooted paths are not allowed");
                }
                Component::CurDir => return reject("'.' is not allowed"),
                Component::Normal(_) => {}
            }
        }

        Ok(())
    }

    fn path_for_id(&self, id: &str) -> Result<PathBuf> {
        Self::validate_id(id)?;
        Ok(self.root.join(id))
    }

    fn id_for_path(root: &Path, p: &Path) -> Result<String> {
        let rel = p
            .strip_prefix(root)
            .map_err(|e| Error::backend(format!("failed to relativize path: {e}")))?;

        rel.to_str()
            .map(|s| s.replace('\\', "/"))
            .ok_or_else(|| Error::backend(format!("non-utf8 path under root: {}", rel.display())))
    }

    fn tmp_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(TMP_SUFFIX);
        PathBuf::from(name)
    }
}

/// Depth-first walk state for lazy key listing.
struct Walk {
    root: PathBuf,
    pending: Vec<PathBuf>,
    current: Option<ReadDir>,
    done: bool,
}

impl Walk {
    /// Produce the next file key, or `None` once the tree is exhausted.
    async fn next_key(&mut self) -> Option<Result<String>> {
        loop {
            if self.current.is_none() {
                let next = self.pending.pop()?;
                match tokio::fs::read_dir(&next).await {
                    Ok(rd) => self.current = Some(rd),
                    // A root that was never written to lists as empty.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Some(Err(e.into())),
                }
            }
            let Some(dir) = self.current.as_mut() else {
                continue;
            };

            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    self.current = None;
                    continue;
                }
                Err(e) => return Some(Err(e.into())),
            };

            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(t) => t,
                Err(e) => return Some(Err(e.into())),
            };

            if file_type.is_dir() {
                self.pending.push(path);
            } else if file_type.is_file() {
                if path.as_os_str().to_string_lossy().ends_with(TMP_SUFFIX) {
                    continue;
                }
                return Some(LocalStorage::id_for_path(&self.root, &path));
            }
        }
    }
}

impl Storage for LocalStorage {
    type Id = String;

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    async fn exists(&self, id: &Self::Id) -> Result<bool> {
        let path = self.path_for_id(id)?;
        match tokio::fs::metadata(path).await {
            Ok(md) => Ok(md.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, id: Self::Id, data: Vec<u8>) -> Result<()> {
        let path = self.path_for_id(&id)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = Self::tmp_path(&path);
        if let Err(e) = tokio::fs::write(&tmp_path, &data).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        tokio::fs::rename(&tmp_path, &path).await?;

        tracing::trace!(?id, bytes = data.len(), "Wrote local object");
        Ok(())
    }

    async fn get(&self, id: &Self::Id) -> Result<Vec<u8>> {
        let path = self.path_for_id(id)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: &Self::Id) -> Result<()> {
        let path = self.path_for_id(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<BoxStream<'_, Result<Self::Id>>> {
        let walk = Walk {
            root: self.root.clone(),
            pending: vec![self.root.clone()],
            current: None,
            done: false,
        };

        Ok(Box::pin(stream::unfold(walk, |mut walk| async move {
            if walk.done {
                return None;
            }
            let item = walk.next_key().await?;
            // Stop after the first error; the walk position is unreliable.
            walk.done = item.is_err();
            Some((item, walk))
        })))
    }
}
