//! Path reconciliation between the two namespaces the crate has to speak.
//!
//! The tracking framework addresses artifacts by forward-slash paths relative
//! to a run's artifact root, while the remote store is addressed by absolute
//! URIs of the form `scheme://user/repo/branch/path`. This module owns the
//! translation in both directions and the derivation of local download paths.
//! Everything here is pure string manipulation; no remote calls are made, so
//! malformed paths are rejected before any I/O is attempted.

use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

use url::Url;

/// Number of leading segments (user, repo, branch) that address the
/// repository rather than the artifact namespace inside it.
const REPO_SEGMENTS: usize = 3;

/// An error produced while constructing or reconciling remote paths.
///
/// Prefix violations are a correctness bug in the backend or in path
/// construction, not a recoverable input error, so callers are expected to
/// surface them rather than retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidPathError {
    /// The URI could not be parsed or is missing the user/repo/branch prefix.
    Malformed { uri: String, reason: String },
    /// A remote path was expected to live under the artifact root but does not.
    OutsideRoot { root: String, path: String },
}

impl fmt::Display for InvalidPathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidPathError::Malformed { uri, reason } => {
                write!(f, "malformed artifact uri {uri}: {reason}")
            }
            InvalidPathError::OutsideRoot { root, path } => {
                write!(
                    f,
                    "remote path does not begin with the artifact root. \
                     artifact root: {root}. remote path: {path}."
                )
            }
        }
    }
}

impl Error for InvalidPathError {}

/// An absolute address under an [`ArtifactRoot`], as handed to the remote
/// store.
///
/// The string form is normalized (single slashes, no `.` segments), so two
/// URIs naming the same remote object compare equal. This is what lets the
/// download traversal use a plain `HashSet<RemoteUri>` as its visited set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteUri(String);

impl RemoteUri {
    /// Backend-internal constructor. Backends derive child URIs from
    /// already-normalized parent URIs, so no re-normalization happens here.
    pub(crate) fn new(uri: String) -> RemoteUri {
        RemoteUri(uri)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The final path segment, e.g. the file name of an object.
    pub fn name(&self) -> &str {
        self.0.trim_end_matches('/').rsplit('/').next().unwrap_or("")
    }

    /// The same location in explicit directory form (trailing separator).
    ///
    /// Listing and directory probes use this form so that a path which is a
    /// string prefix of another (`a/mod` vs `a/model`) cannot be confused
    /// with it by prefix-matching backends.
    pub fn to_directory(&self) -> RemoteUri {
        if self.0.ends_with('/') {
            self.clone()
        } else {
            RemoteUri(format!("{}/", self.0))
        }
    }
}

impl fmt::Display for RemoteUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The storage location of one run's artifacts.
///
/// Constructed once per repository and immutable afterwards. The URI is
/// validated on construction and any trailing separator is normalized away,
/// so joins never produce double slashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactRoot {
    uri: String,
    /// Path below the user/repo/branch prefix, e.g. `exp/run/artifacts`.
    /// Empty when the root points directly at a branch.
    below_branch: String,
}

impl ArtifactRoot {
    /// Parses and validates an artifact root URI.
    ///
    /// The URI must carry a scheme and at least user, repo and branch
    /// segments; anything deeper becomes part of the artifact namespace.
    pub fn new(uri: &str) -> Result<ArtifactRoot, InvalidPathError> {
        let trimmed = uri.trim_end_matches('/');
        let url = Url::parse(trimmed).map_err(|e| InvalidPathError::Malformed {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        if url.cannot_be_a_base() {
            return Err(InvalidPathError::Malformed {
                uri: uri.to_string(),
                reason: "uri has no user/repo/branch path".to_string(),
            });
        }

        // Some schemes put the user in the authority (`xet://user/repo/branch`),
        // others leave it in the path (`memory:///user/repo/branch`). Count
        // both the same way.
        let mut segments: Vec<&str> = Vec::new();
        if let Some(host) = url.host_str() {
            if !host.is_empty() {
                segments.push(host);
            }
        }
        segments.extend(url.path().split('/').filter(|s| !s.is_empty()));

        if segments.len() < REPO_SEGMENTS {
            return Err(InvalidPathError::Malformed {
                uri: uri.to_string(),
                reason: format!(
                    "expected scheme://user/repo/branch, found {} path segment(s)",
                    segments.len()
                ),
            });
        }

        Ok(ArtifactRoot {
            uri: trimmed.to_string(),
            below_branch: segments[REPO_SEGMENTS..].join("/"),
        })
    }

    /// The root itself, as an absolute remote URI.
    pub fn as_uri(&self) -> RemoteUri {
        RemoteUri(self.uri.clone())
    }

    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// Joins the root with a relative artifact path.
    ///
    /// An empty path resolves to the root itself, and resolution composes:
    /// `resolve(join_relative(a, b))` equals resolving `a` and then `b`.
    /// Empty and `.` segments are dropped during normalization.
    pub fn resolve(&self, relative: &str) -> RemoteUri {
        let normalized = normalize_relative(relative);
        if normalized.is_empty() {
            self.as_uri()
        } else {
            RemoteUri(format!("{}/{}", self.uri, normalized))
        }
    }

    /// Inverse of [`resolve`](Self::resolve): strips the root from an
    /// absolute URI, yielding the artifact-relative path.
    ///
    /// Fails when the URI does not live under this root. Every entry a
    /// backend returns for a listing under the root must pass this check.
    pub fn relativize(&self, uri: &RemoteUri) -> Result<String, InvalidPathError> {
        let path = uri.0.trim_end_matches('/');
        if path == self.uri {
            return Ok(String::new());
        }
        match path.strip_prefix(&self.uri) {
            Some(rest) if rest.starts_with('/') => Ok(rest[1..].to_string()),
            _ => Err(InvalidPathError::OutsideRoot {
                root: self.uri.clone(),
                path: uri.0.clone(),
            }),
        }
    }

    /// Derives the local filesystem destination for a remote URI.
    ///
    /// The user/repo/branch prefix addresses the repository, not the
    /// artifact, so it is stripped; the remaining sub-path is mapped onto
    /// `base` preserving its structure. Callers that supply an explicit
    /// destination directory bypass this entirely.
    pub fn local_destination(
        &self,
        uri: &RemoteUri,
        base: &Path,
    ) -> Result<PathBuf, InvalidPathError> {
        let relative = self.relativize(uri)?;
        let mut dest = base.to_path_buf();
        for segment in self
            .below_branch
            .split('/')
            .chain(relative.split('/'))
            .filter(|s| !s.is_empty())
        {
            dest.push(segment);
        }
        Ok(dest)
    }
}

/// Joins two artifact-relative paths with single-slash normalization.
pub fn join_relative(base: &str, rest: &str) -> String {
    let base = normalize_relative(base);
    let rest = normalize_relative(rest);
    if base.is_empty() {
        rest
    } else if rest.is_empty() {
        base
    } else {
        format!("{base}/{rest}")
    }
}

/// Drops empty and `.` segments so that textually different spellings of the
/// same path compare equal after resolution.
fn normalize_relative(relative: &str) -> String {
    relative
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn root() -> ArtifactRoot {
        ArtifactRoot::new("xet://user/repo/main/exp/run/artifacts").unwrap()
    }

    #[test]
    fn trailing_separator_is_normalized_away() {
        let a = ArtifactRoot::new("xet://user/repo/main/").unwrap();
        let b = ArtifactRoot::new("xet://user/repo/main").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_uris_without_repo_prefix() {
        assert!(ArtifactRoot::new("xet://user/repo").is_err());
        assert!(ArtifactRoot::new("not a uri").is_err());
        assert!(ArtifactRoot::new("data:text/plain,hi").is_err());
    }

    #[test]
    fn accepts_path_only_authorities() {
        // memory:/// style URLs keep the user in the path.
        let root = ArtifactRoot::new("memory:///user/repo/main").unwrap();
        assert_eq!(root.as_str(), "memory:///user/repo/main");
    }

    #[test]
    fn empty_path_resolves_to_root() {
        let root = root();
        assert_eq!(root.resolve(""), root.as_uri());
        assert_eq!(root.resolve("."), root.as_uri());
    }

    #[test]
    fn resolve_normalizes_dot_and_empty_segments() {
        let root = root();
        assert_eq!(root.resolve("a//b/./c"), root.resolve("a/b/c"));
    }

    #[test]
    fn relativize_rejects_paths_outside_the_root() {
        let root = root();
        let foreign = RemoteUri("xet://other/repo/main/file".to_string());
        let err = root.relativize(&foreign).unwrap_err();
        match err {
            InvalidPathError::OutsideRoot { ref root, ref path } => {
                assert!(root.contains("xet://user/repo/main"));
                assert!(path.contains("xet://other/repo/main/file"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn relativize_rejects_string_prefixes_that_are_not_path_prefixes() {
        let root = ArtifactRoot::new("xet://user/repo/main/12345/mod").unwrap();
        let sibling = RemoteUri("xet://user/repo/main/12345/model".to_string());
        assert!(root.relativize(&sibling).is_err());
    }

    #[test]
    fn local_destination_strips_the_repo_prefix() {
        let root = root();
        let uri = root.resolve("12345/model");
        let dest = root.local_destination(&uri, Path::new(".")).unwrap();
        assert_eq!(
            dest,
            Path::new("./exp/run/artifacts/12345/model").to_path_buf()
        );
    }

    #[test]
    fn directory_form_appends_a_single_separator() {
        let uri = root().resolve("a/b");
        assert_eq!(uri.to_directory().as_str(), "xet://user/repo/main/exp/run/artifacts/a/b/");
        assert_eq!(uri.to_directory().to_directory(), uri.to_directory());
    }

    #[test]
    fn name_is_the_final_segment() {
        assert_eq!(root().resolve("a/b/hello.txt").name(), "hello.txt");
        assert_eq!(root().resolve("hello.txt").to_directory().name(), "hello.txt");
    }

    proptest! {
        #[test]
        fn resolve_relativize_roundtrip(
            segments in prop::collection::vec("[a-z][a-z0-9_.-]{0,8}", 0..6)
        ) {
            let root = root();
            let relative = segments.join("/");
            let uri = root.resolve(&relative);
            prop_assert_eq!(root.relativize(&uri).unwrap(), relative);
        }

        #[test]
        fn join_then_resolve_composes(
            a in prop::collection::vec("[a-z][a-z0-9]{0,4}", 0..4),
            b in prop::collection::vec("[a-z][a-z0-9]{0,4}", 0..4),
        ) {
            let root = root();
            let a = a.join("/");
            let b = b.join("/");
            let joined = root.resolve(&join_relative(&a, &b));
            let stepwise = ArtifactRoot::new(root.resolve(&a).as_str())
                .unwrap()
                .resolve(&b);
            prop_assert_eq!(joined, stepwise);
        }
    }
}
