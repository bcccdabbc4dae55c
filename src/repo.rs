//! This module provides the artifact repository that the tracking framework
//! talks to: log one file, log a directory tree, list entries, download one
//! or many artifacts to local disk, delete an artifact.
//!
//! The design separates storage concerns from the traversal logic. The
//! remote backend sits behind the [`RemoteStore`] trait, so alternative
//! backends can be substituted in tests without touching the drivers. Two
//! implementations ship with the crate: [`objectstore::ObjectStoreRemote`]
//! over the `object_store` crate (S3, local filesystem, in-memory) and
//! [`memorystore::MemoryStore`] for unit tests and ephemeral use.
//!
//! ## Atomic commits
//!
//! Writes go through a [`StoreTransaction`]: every logical upload or delete
//! opens one transaction, stages its writes and commits once, so a bulk
//! upload is all-or-nothing from the backend's perspective. Whether a
//! backend can actually roll back a half-applied batch is the backend's
//! property; the drivers' only contract is to stop issuing writes after the
//! first error and propagate it. Dropping a transaction without committing
//! abandons its staged writes.
//!
//! ## Safe traversal
//!
//! Remote listings cannot be trusted to describe a tree: a listing may
//! contain `.`-style entries or entries equal to the directory that was just
//! queried, and naive recursion on every listed entry loops forever. The
//! download driver therefore runs an explicit work queue with a call-scoped
//! visited set, mirroring the breadth-first reachability walks used for
//! content-addressed blob graphs. Each distinct remote URI is visited at
//! most once per top-level call, which bounds the traversal regardless of
//! how adversarial the listing responses are.

pub mod memorystore;
pub mod objectstore;

use std::collections::{HashSet, VecDeque};
use std::error::Error;
use std::fmt::{self, Debug};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::path::{join_relative, ArtifactRoot, InvalidPathError, RemoteUri};

/// Backend-reported classification of a listed remote entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One immediate child of a remote directory, as reported by a backend.
///
/// The URI is absolute; the repository relativizes it against the artifact
/// root and enforces the prefix invariant before anything else happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub uri: RemoteUri,
    pub kind: EntryKind,
    /// Object size in bytes, when the backend reports it.
    pub size: Option<u64>,
}

/// The result unit of [`ArtifactRepository::list_artifacts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Path relative to the artifact root (not the queried sub-path), so
    /// nested listing calls compose.
    pub path: String,
    pub is_dir: bool,
    /// `None` for directories and for backends that do not report sizes.
    pub size: Option<u64>,
}

/// A batch of writes applied atomically (or not at all) by the backend.
pub trait StoreTransaction {
    type Error: Error + Debug + Send + Sync + 'static;

    /// Stages a full-object write, creating or overwriting `uri`.
    fn put(&mut self, uri: &RemoteUri, bytes: Bytes) -> Result<(), Self::Error>;

    /// Stages a removal. Removing an absent object is not an error, and a
    /// recursive removal deletes the whole subtree below `uri`.
    fn remove(&mut self, uri: &RemoteUri, recursive: bool) -> Result<(), Self::Error>;

    /// Applies the staged batch.
    fn commit(self) -> Result<(), Self::Error>;
}

/// The abstraction over the remote, content-addressed backend.
///
/// Implementations answer directory probes and one-level listings, copy
/// remote objects to local disk, and wrap batches of writes in a scoped
/// transaction. The transaction handle mutably borrows the store, so the
/// type system enforces that it is exclusively owned by the call that
/// opened it.
pub trait RemoteStore {
    type Error: Error + Debug + Send + Sync + 'static;
    type Transaction<'a>: StoreTransaction<Error = Self::Error>
    where
        Self: 'a;

    /// Whether anything (file or directory) exists at `uri`.
    fn exists(&mut self, uri: &RemoteUri) -> Result<bool, Self::Error>;

    /// Whether `uri` denotes a directory. Probes arrive in trailing-slash
    /// form (see [`RemoteUri::to_directory`]); implementations must treat
    /// `a/b/` and `a/b` as the same location.
    fn is_directory(&mut self, uri: &RemoteUri) -> Result<bool, Self::Error>;

    /// Lists the immediate children of a directory, one level only.
    fn list(&mut self, uri: &RemoteUri) -> Result<Vec<RemoteEntry>, Self::Error>;

    /// Copies remote content to the local filesystem: the single object at
    /// `uri` when `recursive` is false, or every object below `uri` into
    /// `local` (preserving sub-structure) when true.
    fn fetch(&mut self, uri: &RemoteUri, local: &Path, recursive: bool)
        -> Result<(), Self::Error>;

    /// Opens a transaction whose staged writes carry `message` as the
    /// commit message.
    fn transaction(&mut self, message: &str) -> Result<Self::Transaction<'_>, Self::Error>;
}

/// An error from one of the artifact operations, generic over the backend's
/// error type.
#[derive(Debug)]
pub enum ArtifactError<E> {
    /// Malformed URI or a violation of the root-prefix invariant. Raised at
    /// the path-resolver boundary, before any remote call.
    InvalidPath(InvalidPathError),
    /// The remote path does not exist (download only; deleting an absent
    /// path is a no-op and listing one yields an empty listing).
    NotFound { path: String },
    /// Transport, auth or commit failure from the remote store. Not
    /// recoverable locally; surfaced as-is.
    Backend(E),
    /// Filesystem failure on the local side of an upload or download.
    Local(io::Error),
}

impl<E: fmt::Display> fmt::Display for ArtifactError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactError::InvalidPath(e) => write!(f, "{e}"),
            ArtifactError::NotFound { path } => write!(f, "artifact path not found: {path}"),
            ArtifactError::Backend(e) => write!(f, "remote store error: {e}"),
            ArtifactError::Local(e) => write!(f, "local filesystem error: {e}"),
        }
    }
}

impl<E: Error + 'static> Error for ArtifactError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ArtifactError::InvalidPath(e) => Some(e),
            ArtifactError::NotFound { .. } => None,
            ArtifactError::Backend(e) => Some(e),
            ArtifactError::Local(e) => Some(e),
        }
    }
}

impl<E> From<InvalidPathError> for ArtifactError<E> {
    fn from(err: InvalidPathError) -> Self {
        ArtifactError::InvalidPath(err)
    }
}

impl<E> From<io::Error> for ArtifactError<E> {
    fn from(err: io::Error) -> Self {
        ArtifactError::Local(err)
    }
}

/// Stores one run's artifacts on a remote, git-like content store.
///
/// The repository owns its [`ArtifactRoot`] for its lifetime and holds no
/// other state across calls; listings and download plans are rebuilt fresh
/// per call.
#[derive(Debug)]
pub struct ArtifactRepository<S> {
    root: ArtifactRoot,
    store: S,
    /// Base directory for download destinations derived from remote URIs.
    download_root: PathBuf,
}

impl<S: RemoteStore> ArtifactRepository<S> {
    pub fn new(root: ArtifactRoot, store: S) -> Self {
        ArtifactRepository {
            root,
            store,
            download_root: PathBuf::from("."),
        }
    }

    /// Overrides the base directory used when a download does not supply an
    /// explicit destination.
    pub fn with_download_root(mut self, base: impl Into<PathBuf>) -> Self {
        self.download_root = base.into();
        self
    }

    pub fn root(&self) -> &ArtifactRoot {
        &self.root
    }

    /// Access to the backend, mainly for tests inspecting store state.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Logs a local file as an artifact.
    ///
    /// The destination is `artifact_path` when given, otherwise the file's
    /// base name under the artifact root. One transaction per call; logging
    /// the same file to the same destination twice overwrites, it does not
    /// duplicate.
    pub fn log_artifact(
        &mut self,
        local_file: &Path,
        artifact_path: Option<&str>,
    ) -> Result<(), ArtifactError<S::Error>> {
        let name = file_name(local_file)?;
        let destination = match artifact_path {
            Some(path) => path.to_string(),
            None => name.clone(),
        };
        let bytes = fs::read(local_file)?;
        let uri = self.root.resolve(&destination);

        let mut tx = self
            .store
            .transaction(&format!("Log artifact {name}"))
            .map_err(ArtifactError::Backend)?;
        tx.put(&uri, bytes.into()).map_err(ArtifactError::Backend)?;
        tx.commit().map_err(ArtifactError::Backend)
    }

    /// Logs every file under a local directory, preserving the relative
    /// sub-structure: `dir/nested/nest.txt` lands at `<base>/nested/nest.txt`.
    ///
    /// All writes for one call share a single transaction, so the bulk
    /// upload is all-or-nothing from the backend's perspective. Files are
    /// visited in directory-walk order; callers must not rely on the
    /// relative ordering of writes. The first failing read or write aborts
    /// the remaining writes and the transaction is dropped uncommitted.
    pub fn log_artifacts(
        &mut self,
        local_dir: &Path,
        artifact_path: Option<&str>,
    ) -> Result<(), ArtifactError<S::Error>> {
        let base = artifact_path.unwrap_or("");
        let name = file_name(local_dir)?;
        let mut files = Vec::new();
        walk_files(local_dir, &mut files)?;

        let mut tx = self
            .store
            .transaction(&format!("Log artifacts {name}"))
            .map_err(ArtifactError::Backend)?;
        for file in files {
            let relative = file.strip_prefix(local_dir).map_err(|_| {
                io::Error::other(format!(
                    "walked file {} escaped {}",
                    file.display(),
                    local_dir.display()
                ))
            })?;
            let destination = join_relative(base, &artifact_path_of(relative));
            let bytes = fs::read(&file)?;
            tx.put(&self.root.resolve(&destination), bytes.into())
                .map_err(ArtifactError::Backend)?;
        }
        tx.commit().map_err(ArtifactError::Backend)
    }

    /// Lists the immediate children of `path` (the root when `None`).
    ///
    /// Listing a file, or a path that does not exist, yields an empty
    /// sequence rather than an error: a leaf has no children. Results are
    /// relative to the artifact root and sorted for deterministic output.
    pub fn list_artifacts(
        &mut self,
        path: Option<&str>,
    ) -> Result<Vec<Entry>, ArtifactError<S::Error>> {
        let relative = path.unwrap_or("");
        if !self.is_remote_directory(relative)? {
            return Ok(Vec::new());
        }
        self.entries_of(relative)
    }

    /// Downloads the artifact(s) at `relative` to local disk and returns
    /// the local path that now holds them.
    ///
    /// With an explicit destination the caller owns path disambiguation and
    /// the copy is delegated to the backend directly: a directory is
    /// fetched recursively into `dst`, a single file lands at
    /// `dst/<name>`. Without one, the destination is derived from the
    /// remote URI under the repository's download root and the directory
    /// tree is walked with an explicit queue and visited set, so
    /// self-referential or `.`-style listing entries cannot cause infinite
    /// recursion. Empty remote directories are materialized as empty local
    /// directories, never dropped.
    ///
    /// A failure aborts the remaining queue; files already copied remain on
    /// disk, so callers must treat a failed download as possibly partial.
    pub fn download_artifacts(
        &mut self,
        relative: &str,
        dst: Option<&Path>,
    ) -> Result<PathBuf, ArtifactError<S::Error>> {
        let uri = self.root.resolve(relative);
        if !relative.is_empty() && !self.store.exists(&uri).map_err(ArtifactError::Backend)? {
            return Err(ArtifactError::NotFound {
                path: relative.to_string(),
            });
        }

        if let Some(dst) = dst {
            fs::create_dir_all(dst)?;
            if self.is_remote_directory(relative)? {
                self.store
                    .fetch(&uri, dst, true)
                    .map_err(ArtifactError::Backend)?;
            } else {
                self.store
                    .fetch(&uri, &dst.join(uri.name()), false)
                    .map_err(ArtifactError::Backend)?;
            }
            return Ok(dst.to_path_buf());
        }

        let destination = self.local_destination(&uri)?;
        let mut queue: VecDeque<(String, PathBuf)> = VecDeque::new();
        let mut visited: HashSet<RemoteUri> = HashSet::new();
        visited.insert(uri);
        queue.push_back((relative.to_string(), destination.clone()));

        while let Some((relative, local)) = queue.pop_front() {
            let uri = self.root.resolve(&relative);
            if self.is_remote_directory(&relative)? {
                // An empty directory still materializes locally.
                fs::create_dir_all(&local)?;
                for entry in self.entries_of(&relative)? {
                    let child = self.root.resolve(&entry.path);
                    // A listing entry naming the directory just queried
                    // (directly, or as a `.` entry collapsed by path
                    // normalization) must not re-enter the queue, and
                    // neither must anything enqueued earlier in this call.
                    if child == uri || !visited.insert(child.clone()) {
                        continue;
                    }
                    let child_local = self.local_destination(&child)?;
                    queue.push_back((entry.path, child_local));
                }
            } else {
                if let Some(parent) = local.parent() {
                    fs::create_dir_all(parent)?;
                }
                self.store
                    .fetch(&uri, &local, false)
                    .map_err(ArtifactError::Backend)?;
            }
        }
        Ok(destination)
    }

    /// Deletes the artifact(s) at `path` (everything under the root when
    /// `None`).
    ///
    /// A directory is removed as one recursive removal inside a single
    /// transaction; a file removal is a single-object transaction. Deleting
    /// an already-absent path is idempotent and succeeds.
    pub fn delete_artifacts(
        &mut self,
        path: Option<&str>,
    ) -> Result<(), ArtifactError<S::Error>> {
        let relative = path.unwrap_or("");
        let uri = self.root.resolve(relative);
        if !self.store.exists(&uri).map_err(ArtifactError::Backend)? {
            return Ok(());
        }
        let recursive = self.is_remote_directory(relative)?;

        let mut tx = self
            .store
            .transaction(&format!("Delete artifacts {}", uri.name()))
            .map_err(ArtifactError::Backend)?;
        tx.remove(&uri, recursive).map_err(ArtifactError::Backend)?;
        tx.commit().map_err(ArtifactError::Backend)
    }

    /// Directory probe for a relative path. The empty path is the root
    /// itself, which is a directory by definition. Non-empty paths are
    /// probed in trailing-slash form so that a path which is a string
    /// prefix of another is not confused with it.
    fn is_remote_directory(&mut self, relative: &str) -> Result<bool, ArtifactError<S::Error>> {
        if relative.is_empty() {
            return Ok(true);
        }
        let probe = self.root.resolve(relative).to_directory();
        self.store.is_directory(&probe).map_err(ArtifactError::Backend)
    }

    /// One-level listing of a directory already known to exist, validated
    /// against the root-prefix invariant and sorted by relative path.
    fn entries_of(&mut self, relative: &str) -> Result<Vec<Entry>, ArtifactError<S::Error>> {
        let probe = self.root.resolve(relative).to_directory();
        let children = self.store.list(&probe).map_err(ArtifactError::Backend)?;
        let mut entries = Vec::with_capacity(children.len());
        for child in children {
            // A backend entry outside the root is a bug in the backend or
            // in path construction; abort with both paths named.
            let path = self.root.relativize(&child.uri)?;
            let is_dir = child.kind == EntryKind::Directory;
            entries.push(Entry {
                path,
                is_dir,
                size: if is_dir { None } else { child.size },
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn local_destination(&self, uri: &RemoteUri) -> Result<PathBuf, ArtifactError<S::Error>> {
        Ok(self.root.local_destination(uri, &self.download_root)?)
    }
}

/// Recursively collects every file below `dir`, in directory-walk order.
fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_files(&entry.path(), out)?;
        } else if file_type.is_file() {
            out.push(entry.path());
        }
    }
    Ok(())
}

/// Converts a relative local path into a forward-slash artifact path.
fn artifact_path_of(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// The final component of a local path, as a string.
fn file_name<E>(path: &Path) -> Result<String, ArtifactError<E>> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            ArtifactError::Local(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("local path has no file name: {}", path.display()),
            ))
        })
}
