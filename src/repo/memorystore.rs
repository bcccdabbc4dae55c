//! Simple in-memory implementation of [`RemoteStore`].
//!
//! Useful for unit tests or ephemeral repositories where persistence is not
//! required. Directory structure is derived from object keys, with an extra
//! set of explicitly created directories so that empty directories (which a
//! key-derived view could not represent) still exist. Every committed
//! transaction records its message, letting tests assert that a logical
//! operation produced exactly one commit.

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use bytes::Bytes;

use crate::path::RemoteUri;
use crate::repo::{EntryKind, RemoteEntry, RemoteStore, StoreTransaction};

#[derive(Debug)]
pub enum MemoryStoreError {
    /// A fetch asked for an object that is not in the store.
    NotFound(String),
    /// Writing fetched bytes to local disk failed.
    Io(io::Error),
}

impl fmt::Display for MemoryStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryStoreError::NotFound(uri) => write!(f, "object not found: {uri}"),
            MemoryStoreError::Io(e) => write!(f, "local write failed: {e}"),
        }
    }
}

impl Error for MemoryStoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MemoryStoreError::NotFound(_) => None,
            MemoryStoreError::Io(e) => Some(e),
        }
    }
}

impl From<io::Error> for MemoryStoreError {
    fn from(err: io::Error) -> Self {
        MemoryStoreError::Io(err)
    }
}

/// In-memory remote store keyed by absolute URI strings.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: BTreeMap<String, Bytes>,
    /// Explicitly created directories, including empty ones.
    dirs: BTreeSet<String>,
    commits: Vec<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Messages of every committed transaction, in order.
    pub fn commit_messages(&self) -> &[String] {
        &self.commits
    }

    /// Direct object lookup for test assertions.
    pub fn object(&self, uri: &RemoteUri) -> Option<&Bytes> {
        self.objects.get(uri.as_str().trim_end_matches('/'))
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Seeds an object without going through a transaction.
    pub fn insert_object(&mut self, uri: &RemoteUri, bytes: impl Into<Bytes>) {
        self.objects
            .insert(uri.as_str().trim_end_matches('/').to_string(), bytes.into());
    }

    /// Creates a directory, possibly empty.
    pub fn create_dir(&mut self, uri: &RemoteUri) {
        self.dirs
            .insert(uri.as_str().trim_end_matches('/').to_string());
    }

    fn has_children(&self, key: &str) -> bool {
        let prefix = format!("{key}/");
        self.objects.keys().any(|k| k.starts_with(&prefix))
            || self.dirs.iter().any(|d| d.starts_with(&prefix))
    }
}

impl RemoteStore for MemoryStore {
    type Error = MemoryStoreError;
    type Transaction<'a> = MemoryTransaction<'a>;

    fn exists(&mut self, uri: &RemoteUri) -> Result<bool, Self::Error> {
        let key = uri.as_str().trim_end_matches('/');
        Ok(self.objects.contains_key(key) || self.dirs.contains(key) || self.has_children(key))
    }

    fn is_directory(&mut self, uri: &RemoteUri) -> Result<bool, Self::Error> {
        let key = uri.as_str().trim_end_matches('/');
        Ok(self.dirs.contains(key) || self.has_children(key))
    }

    fn list(&mut self, uri: &RemoteUri) -> Result<Vec<RemoteEntry>, Self::Error> {
        let key = uri.as_str().trim_end_matches('/');
        let prefix = format!("{key}/");
        // Immediate children only: deeper keys surface as directory entries.
        let mut children: BTreeMap<String, (EntryKind, Option<u64>)> = BTreeMap::new();
        for (object, bytes) in &self.objects {
            if let Some(rest) = object.strip_prefix(&prefix) {
                match rest.split_once('/') {
                    None => {
                        children.insert(
                            rest.to_string(),
                            (EntryKind::File, Some(bytes.len() as u64)),
                        );
                    }
                    Some((first, _)) => {
                        children
                            .entry(first.to_string())
                            .or_insert((EntryKind::Directory, None));
                    }
                }
            }
        }
        for dir in &self.dirs {
            if let Some(rest) = dir.strip_prefix(&prefix) {
                let first = rest.split('/').next().unwrap_or(rest);
                children
                    .entry(first.to_string())
                    .or_insert((EntryKind::Directory, None));
            }
        }
        Ok(children
            .into_iter()
            .map(|(name, (kind, size))| RemoteEntry {
                uri: RemoteUri::new(format!("{prefix}{name}")),
                kind,
                size,
            })
            .collect())
    }

    fn fetch(
        &mut self,
        uri: &RemoteUri,
        local: &Path,
        recursive: bool,
    ) -> Result<(), Self::Error> {
        let key = uri.as_str().trim_end_matches('/');
        if !recursive {
            let bytes = self
                .objects
                .get(key)
                .ok_or_else(|| MemoryStoreError::NotFound(key.to_string()))?;
            if let Some(parent) = local.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(local, bytes)?;
            return Ok(());
        }

        let prefix = format!("{key}/");
        for (object, bytes) in &self.objects {
            if let Some(rest) = object.strip_prefix(&prefix) {
                let mut path = local.to_path_buf();
                path.extend(rest.split('/'));
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, bytes)?;
            }
        }
        for dir in &self.dirs {
            if let Some(rest) = dir.strip_prefix(&prefix) {
                let mut path = local.to_path_buf();
                path.extend(rest.split('/'));
                fs::create_dir_all(&path)?;
            }
        }
        Ok(())
    }

    fn transaction(&mut self, message: &str) -> Result<Self::Transaction<'_>, Self::Error> {
        Ok(MemoryTransaction {
            store: self,
            message: message.to_string(),
            puts: Vec::new(),
            removes: Vec::new(),
        })
    }
}

/// Transaction over a [`MemoryStore`]: stages writes and applies them all
/// at once on commit. Dropping the transaction discards the staged batch.
#[derive(Debug)]
pub struct MemoryTransaction<'a> {
    store: &'a mut MemoryStore,
    message: String,
    puts: Vec<(String, Bytes)>,
    removes: Vec<(String, bool)>,
}

impl StoreTransaction for MemoryTransaction<'_> {
    type Error = MemoryStoreError;

    fn put(&mut self, uri: &RemoteUri, bytes: Bytes) -> Result<(), Self::Error> {
        self.puts
            .push((uri.as_str().trim_end_matches('/').to_string(), bytes));
        Ok(())
    }

    fn remove(&mut self, uri: &RemoteUri, recursive: bool) -> Result<(), Self::Error> {
        self.removes
            .push((uri.as_str().trim_end_matches('/').to_string(), recursive));
        Ok(())
    }

    fn commit(self) -> Result<(), Self::Error> {
        for (key, bytes) in self.puts {
            self.store.objects.insert(key, bytes);
        }
        for (key, recursive) in self.removes {
            self.store.objects.remove(&key);
            self.store.dirs.remove(&key);
            if recursive {
                let prefix = format!("{key}/");
                self.store.objects.retain(|k, _| !k.starts_with(&prefix));
                self.store.dirs.retain(|d| !d.starts_with(&prefix));
            }
        }
        self.store.commits.push(self.message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::ArtifactRoot;

    fn root() -> ArtifactRoot {
        ArtifactRoot::new("xet://user/repo/main").unwrap()
    }

    #[test]
    fn listing_derives_immediate_children_from_keys() {
        let root = root();
        let mut store = MemoryStore::new();
        store.insert_object(&root.resolve("a.txt"), "a");
        store.insert_object(&root.resolve("sub/b.txt"), "bb");
        store.insert_object(&root.resolve("sub/deep/c.txt"), "ccc");

        let entries = store.list(&root.as_uri()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].uri, root.resolve("a.txt"));
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[0].size, Some(1));
        assert_eq!(entries[1].uri, root.resolve("sub"));
        assert_eq!(entries[1].kind, EntryKind::Directory);
        assert_eq!(entries[1].size, None);
    }

    #[test]
    fn trailing_slash_probes_name_the_same_location() {
        let root = root();
        let mut store = MemoryStore::new();
        store.insert_object(&root.resolve("model/file"), "x");

        assert!(store.is_directory(&root.resolve("model")).unwrap());
        assert!(store
            .is_directory(&root.resolve("model").to_directory())
            .unwrap());
        // A string prefix of another path is not a directory.
        assert!(!store
            .is_directory(&root.resolve("mod").to_directory())
            .unwrap());
    }

    #[test]
    fn empty_directories_exist_and_list_empty() {
        let root = root();
        let mut store = MemoryStore::new();
        store.create_dir(&root.resolve("empty"));

        assert!(store.exists(&root.resolve("empty")).unwrap());
        assert!(store.is_directory(&root.resolve("empty")).unwrap());
        assert!(store.list(&root.resolve("empty")).unwrap().is_empty());
    }

    #[test]
    fn dropped_transactions_leave_no_trace() {
        let root = root();
        let mut store = MemoryStore::new();
        {
            let mut tx = store.transaction("abandoned").unwrap();
            tx.put(&root.resolve("ghost"), Bytes::from_static(b"boo"))
                .unwrap();
        }
        assert_eq!(store.object_count(), 0);
        assert!(store.commit_messages().is_empty());
    }

    #[test]
    fn recursive_remove_deletes_the_subtree() {
        let root = root();
        let mut store = MemoryStore::new();
        store.insert_object(&root.resolve("keep.txt"), "k");
        store.insert_object(&root.resolve("gone/a"), "a");
        store.insert_object(&root.resolve("gone/sub/b"), "b");

        let mut tx = store.transaction("Delete artifacts gone").unwrap();
        tx.remove(&root.resolve("gone"), true).unwrap();
        tx.commit().unwrap();

        assert_eq!(store.object_count(), 1);
        assert!(store.object(&root.resolve("keep.txt")).is_some());
        assert_eq!(store.commit_messages(), ["Delete artifacts gone"]);
    }
}
