//! trackfs — store experiment-tracking artifacts on a remote, git-like
//! content-addressed file store.
//!
//! Tracking frameworks address a run's artifacts by forward-slash paths
//! relative to an artifact root; git-like content stores address files by
//! absolute `scheme://user/repo/branch/path` URIs. This crate bridges the
//! two namespaces and drives the small set of artifact operations over that
//! bridge: log one file, log a directory tree, list entries under a path,
//! download one or many artifacts to local disk, delete an artifact.
//!
//! The interesting part is not the plumbing but the reconciliation and
//! traversal logic:
//!
//! - [`path`] converts between the artifact-relative and absolute remote
//!   namespaces, and derives local download destinations. Pure functions;
//!   malformed paths are rejected before any remote call.
//! - [`repo`] hosts the [`repo::RemoteStore`] abstraction over the backend
//!   and the [`repo::ArtifactRepository`] drivers. Bulk uploads wrap all
//!   writes of one logical operation in a single atomic commit, and the
//!   download traversal is an explicit work queue with a call-scoped
//!   visited set, so self-referential or `.`-style listing responses from
//!   the remote terminate instead of recursing forever.
//!
//! Authentication, session handling and commit semantics beyond "atomic
//! batch of writes" belong to the backend behind [`repo::RemoteStore`], not
//! to this crate.
//!
//! ## Basic usage
//!
//! ```rust,ignore
//! use trackfs::path::ArtifactRoot;
//! use trackfs::repo::objectstore::ObjectStoreRemote;
//! use trackfs::repo::ArtifactRepository;
//! use url::Url;
//!
//! let url = Url::parse("s3://bucket/user/repo/main/exp/run/artifacts")?;
//! let root = ArtifactRoot::new(url.as_str())?;
//! let store = ObjectStoreRemote::with_url(&url)?;
//! let mut repo = ArtifactRepository::new(root, store);
//!
//! repo.log_artifact("model.bin".as_ref(), None)?;
//! let entries = repo.list_artifacts(None)?;
//! let local = repo.download_artifacts("model.bin", None)?;
//! ```

pub mod path;
pub mod repo;
