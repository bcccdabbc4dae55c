//! Termination of derived-destination downloads against backends whose
//! listings are degenerate: entries naming the queried directory itself,
//! `.`-style entries, or parent/child cycles. Each scripted store replays a
//! fixed listing table and the test asserts the walk finishes with exactly
//! the expected files on disk.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use bytes::Bytes;
use trackfs::path::{ArtifactRoot, RemoteUri};
use trackfs::repo::memorystore::MemoryStoreError;
use trackfs::repo::{
    ArtifactRepository, EntryKind, RemoteEntry, RemoteStore, StoreTransaction,
};

/// Replays canned listings. Every file fetch writes the same marker bytes;
/// a path is a directory exactly when the listing table has a row for it.
struct ScriptedStore {
    root: ArtifactRoot,
    listings: HashMap<String, Vec<(String, bool)>>,
}

impl ScriptedStore {
    fn new(root: &ArtifactRoot, rows: &[(&str, &[(&str, bool)])]) -> Self {
        let listings = rows
            .iter()
            .map(|(query, entries)| {
                let entries = entries
                    .iter()
                    .map(|(name, is_dir)| (name.to_string(), *is_dir))
                    .collect();
                (query.to_string(), entries)
            })
            .collect();
        ScriptedStore {
            root: root.clone(),
            listings,
        }
    }

    fn rel(&self, uri: &RemoteUri) -> String {
        let trimmed = uri.as_str().trim_end_matches('/');
        trimmed
            .strip_prefix(self.root.as_str())
            .map(|rest| rest.trim_start_matches('/').to_string())
            .unwrap_or_default()
    }
}

struct NoopTransaction;

impl StoreTransaction for NoopTransaction {
    type Error = MemoryStoreError;

    fn put(&mut self, _uri: &RemoteUri, _bytes: Bytes) -> Result<(), Self::Error> {
        Ok(())
    }

    fn remove(&mut self, _uri: &RemoteUri, _recursive: bool) -> Result<(), Self::Error> {
        Ok(())
    }

    fn commit(self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl RemoteStore for ScriptedStore {
    type Error = MemoryStoreError;
    type Transaction<'a> = NoopTransaction;

    fn exists(&mut self, _uri: &RemoteUri) -> Result<bool, Self::Error> {
        // Every scripted path exists; the tests only probe paths they name.
        Ok(true)
    }

    fn is_directory(&mut self, uri: &RemoteUri) -> Result<bool, Self::Error> {
        let rel = self.rel(uri);
        Ok(self.listings.contains_key(&rel))
    }

    fn list(&mut self, uri: &RemoteUri) -> Result<Vec<RemoteEntry>, Self::Error> {
        let rel = self.rel(uri);
        let rows = self.listings.get(&rel).cloned().unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|(name, is_dir)| RemoteEntry {
                uri: self.root.resolve(&name),
                kind: if is_dir {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
                size: if is_dir { None } else { Some(4) },
            })
            .collect())
    }

    fn fetch(&mut self, _uri: &RemoteUri, local: &Path, _recursive: bool) -> Result<(), Self::Error> {
        fs::write(local, b"data").map_err(MemoryStoreError::Io)
    }

    fn transaction(&mut self, _message: &str) -> Result<Self::Transaction<'_>, Self::Error> {
        Ok(NoopTransaction)
    }
}

/// Runs a derived-destination download and asserts the resulting directory
/// holds exactly one file named `modelfile`.
fn assert_single_modelfile(base: &str, arg: &str, rows: &[(&str, &[(&str, bool)])]) {
    let root = ArtifactRoot::new(base).unwrap();
    let store = ScriptedStore::new(&root, rows);
    let tmp = tempfile::tempdir().unwrap();
    let mut repo = ArtifactRepository::new(root, store).with_download_root(tmp.path());

    let out = repo.download_artifacts(arg, None).unwrap();

    let names: Vec<_> = fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, ["modelfile"]);
    assert_eq!(fs::read(out.join("modelfile")).unwrap(), b"data");
}

#[test]
fn walks_a_root_whose_listing_is_well_behaved() {
    assert_single_modelfile(
        "xet://user/repo/main/12345/model",
        "",
        &[("", &[("modelfile", false)])],
    );
}

#[test]
fn skips_a_dot_entry_naming_the_root_itself() {
    assert_single_modelfile(
        "xet://user/repo/main/12345/model",
        "",
        &[("", &[(".", true), ("modelfile", false)])],
    );
}

#[test]
fn walks_a_subdirectory_whose_listing_is_well_behaved() {
    assert_single_modelfile(
        "xet://user/repo/main/12345",
        "model",
        &[("model", &[("model/modelfile", false)])],
    );
}

#[test]
fn skips_a_listing_entry_naming_the_queried_directory() {
    assert_single_modelfile(
        "xet://user/repo/main/12345",
        "model",
        &[("model", &[("model", true), ("model/modelfile", false)])],
    );
}

#[test]
fn walks_a_deep_path_below_the_branch_root() {
    assert_single_modelfile(
        "xet://user/repo/main",
        "12345/model",
        &[("12345/model", &[("12345/model/modelfile", false)])],
    );
}

#[test]
fn skips_a_deep_self_entry() {
    assert_single_modelfile(
        "xet://user/repo/main",
        "12345/model",
        &[(
            "12345/model",
            &[("12345/model", true), ("12345/model/modelfile", false)],
        )],
    );
}

#[test]
fn terminates_on_a_parent_child_listing_cycle() {
    let root = ArtifactRoot::new("xet://user/repo/main").unwrap();
    let store = ScriptedStore::new(
        &root,
        &[("a", &[("a/b", true)]), ("a/b", &[("a", true)])],
    );
    let tmp = tempfile::tempdir().unwrap();
    let mut repo = ArtifactRepository::new(root, store).with_download_root(tmp.path());

    let out = repo.download_artifacts("a", None).unwrap();

    assert!(out.join("b").is_dir());
    assert_eq!(fs::read_dir(out.join("b")).unwrap().count(), 0);
}

#[test]
fn materializes_empty_directories_found_during_the_walk() {
    let root = ArtifactRoot::new("xet://user/repo/main").unwrap();
    let store = ScriptedStore::new(
        &root,
        &[
            (
                "12345/model",
                &[
                    ("12345/model/modelfile", false),
                    ("12345/model/emptydir", true),
                ],
            ),
            ("12345/model/emptydir", &[]),
        ],
    );
    let tmp = tempfile::tempdir().unwrap();
    let mut repo = ArtifactRepository::new(root, store).with_download_root(tmp.path());

    let out = repo.download_artifacts("12345/model", None).unwrap();

    assert_eq!(fs::read(out.join("modelfile")).unwrap(), b"data");
    let empty = out.join("emptydir");
    assert!(empty.is_dir());
    assert_eq!(fs::read_dir(&empty).unwrap().count(), 0);
}
