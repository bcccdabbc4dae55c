//! Remote store backed by an [`object_store`] compatible storage backend.
//!
//! All data lives in an external service (e.g. S3, a local filesystem, or
//! the in-memory store used in tests) via the `object_store` crate. The
//! crate's API is async; since the artifact drivers are synchronous and all
//! blocking is bounded by the backend's own I/O latency, calls are bridged
//! with [`futures::executor::block_on`].
//!
//! Object stores have no real directories, so directory-ness is emulated:
//! a path is a directory iff it is not itself an object and a delimited
//! listing below it is non-empty. Empty remote directories therefore cannot
//! exist in this backend; they can in [`super::memorystore::MemoryStore`].

use std::fmt;
use std::fs;
use std::io;
use std::path::Path as StdPath;
use std::sync::Arc;

use bytes::Bytes;
use futures::executor::block_on;
use futures::StreamExt;
use object_store::path::Path;
use object_store::{parse_url, ObjectStore};
use url::Url;

use crate::path::RemoteUri;
use crate::repo::{EntryKind, RemoteEntry, RemoteStore, StoreTransaction};

const STORE_NAME: &str = "trackfs";

/// Remote store addressing an `object_store` backend through absolute URIs.
///
/// The store is rooted at the URL it was constructed with; every URI passed
/// to it must live under that base.
pub struct ObjectStoreRemote {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    /// Normalized string form of the base URL, stripped of any trailing
    /// separator so URI reconciliation matches [`crate::path::ArtifactRoot`].
    base: String,
}

impl fmt::Debug for ObjectStoreRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreRemote")
            .field("base", &self.base)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ObjectStoreRemote {
    /// Creates a remote store pointing at the object store described by
    /// `url` (e.g. `s3://bucket/user/repo/branch` or `memory:///u/r/main`).
    pub fn with_url(url: &Url) -> Result<ObjectStoreRemote, object_store::Error> {
        let (store, prefix) = parse_url(url)?;
        Ok(ObjectStoreRemote {
            store: Arc::from(store),
            prefix,
            base: url.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn to_path(&self, uri: &RemoteUri) -> Result<Path, object_store::Error> {
        let trimmed = uri.as_str().trim_end_matches('/');
        let rest = trimmed
            .strip_prefix(&self.base)
            .ok_or_else(|| object_store::Error::Generic {
                store: STORE_NAME,
                source: format!("uri {} is outside the store base {}", uri, self.base).into(),
            })?;
        let mut path = self.prefix.clone();
        for segment in rest.split('/').filter(|s| !s.is_empty()) {
            path = path.child(segment);
        }
        Ok(path)
    }

    fn uri_for(&self, path: &Path) -> Result<RemoteUri, object_store::Error> {
        let parts = path
            .prefix_match(&self.prefix)
            .ok_or_else(|| object_store::Error::Generic {
                store: STORE_NAME,
                source: format!(
                    "listed path {path} is outside the store prefix {}",
                    self.prefix
                )
                .into(),
            })?;
        let mut uri = self.base.clone();
        for part in parts {
            uri.push('/');
            uri.push_str(part.as_ref());
        }
        Ok(RemoteUri::new(uri))
    }
}

fn local_write_error(err: io::Error) -> object_store::Error {
    object_store::Error::Generic {
        store: STORE_NAME,
        source: Box::new(err),
    }
}

fn write_object(local: &StdPath, bytes: &Bytes) -> Result<(), object_store::Error> {
    if let Some(parent) = local.parent() {
        fs::create_dir_all(parent).map_err(local_write_error)?;
    }
    fs::write(local, bytes).map_err(local_write_error)
}

impl RemoteStore for ObjectStoreRemote {
    type Error = object_store::Error;
    type Transaction<'a> = ObjectStoreTransaction<'a>;

    fn exists(&mut self, uri: &RemoteUri) -> Result<bool, Self::Error> {
        let path = self.to_path(uri)?;
        match block_on(self.store.head(&path)) {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => self.is_directory(uri),
            Err(e) => Err(e),
        }
    }

    fn is_directory(&mut self, uri: &RemoteUri) -> Result<bool, Self::Error> {
        let path = self.to_path(uri)?;
        match block_on(self.store.head(&path)) {
            // An object at the exact path is a file, never a directory.
            Ok(_) => Ok(false),
            Err(object_store::Error::NotFound { .. }) => {
                let listing = block_on(self.store.list_with_delimiter(Some(&path)))?;
                Ok(!listing.objects.is_empty() || !listing.common_prefixes.is_empty())
            }
            Err(e) => Err(e),
        }
    }

    fn list(&mut self, uri: &RemoteUri) -> Result<Vec<RemoteEntry>, Self::Error> {
        let path = self.to_path(uri)?;
        let listing = block_on(self.store.list_with_delimiter(Some(&path)))?;
        let mut entries = Vec::with_capacity(listing.objects.len() + listing.common_prefixes.len());
        for prefix in listing.common_prefixes {
            entries.push(RemoteEntry {
                uri: self.uri_for(&prefix)?,
                kind: EntryKind::Directory,
                size: None,
            });
        }
        for meta in listing.objects {
            if meta.location == path {
                continue;
            }
            entries.push(RemoteEntry {
                uri: self.uri_for(&meta.location)?,
                kind: EntryKind::File,
                size: Some(meta.size),
            });
        }
        Ok(entries)
    }

    fn fetch(
        &mut self,
        uri: &RemoteUri,
        local: &StdPath,
        recursive: bool,
    ) -> Result<(), Self::Error> {
        let path = self.to_path(uri)?;
        if !recursive {
            let object = block_on(self.store.get(&path))?;
            let bytes = block_on(object.bytes())?;
            return write_object(local, &bytes);
        }

        let metas: Vec<_> = block_on(self.store.list(Some(&path)).collect::<Vec<_>>());
        for meta in metas {
            let meta = meta?;
            let parts = meta
                .location
                .prefix_match(&path)
                .ok_or_else(|| object_store::Error::Generic {
                    store: STORE_NAME,
                    source: format!(
                        "listed path {} is outside the fetched prefix {path}",
                        meta.location
                    )
                    .into(),
                })?;
            let mut destination = local.to_path_buf();
            for part in parts {
                destination.push(part.as_ref());
            }
            let object = block_on(self.store.get(&meta.location))?;
            let bytes = block_on(object.bytes())?;
            write_object(&destination, &bytes)?;
        }
        Ok(())
    }

    fn transaction(&mut self, message: &str) -> Result<Self::Transaction<'_>, Self::Error> {
        Ok(ObjectStoreTransaction {
            remote: self,
            message: message.to_string(),
            puts: Vec::new(),
            removes: Vec::new(),
        })
    }
}

/// Staged batch of writes against an [`ObjectStoreRemote`].
///
/// Object stores offer no multi-object transaction, so the batch is staged
/// locally and applied on commit; atomicity of the applied batch is only as
/// strong as the backend's. Dropping the transaction discards the batch
/// without touching the store.
pub struct ObjectStoreTransaction<'a> {
    remote: &'a ObjectStoreRemote,
    message: String,
    puts: Vec<(Path, Bytes)>,
    removes: Vec<(Path, bool)>,
}

impl fmt::Debug for ObjectStoreTransaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreTransaction")
            .field("message", &self.message)
            .field("puts", &self.puts.len())
            .field("removes", &self.removes.len())
            .finish()
    }
}

impl ObjectStoreTransaction<'_> {
    /// The commit message this batch was opened with.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl StoreTransaction for ObjectStoreTransaction<'_> {
    type Error = object_store::Error;

    fn put(&mut self, uri: &RemoteUri, bytes: Bytes) -> Result<(), Self::Error> {
        let path = self.remote.to_path(uri)?;
        self.puts.push((path, bytes));
        Ok(())
    }

    fn remove(&mut self, uri: &RemoteUri, recursive: bool) -> Result<(), Self::Error> {
        let path = self.remote.to_path(uri)?;
        self.removes.push((path, recursive));
        Ok(())
    }

    fn commit(self) -> Result<(), Self::Error> {
        let store = &self.remote.store;
        for (path, bytes) in self.puts {
            block_on(store.put(&path, bytes.into()))?;
        }
        for (path, recursive) in self.removes {
            if recursive {
                let metas: Vec<_> = block_on(store.list(Some(&path)).collect::<Vec<_>>());
                for meta in metas {
                    let meta = meta?;
                    block_on(store.delete(&meta.location))?;
                }
            }
            // Removing an absent object is idempotent.
            match block_on(store.delete(&path)) {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
